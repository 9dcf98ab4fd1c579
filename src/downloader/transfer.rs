//! Per-file transfer -- stream, decode, and commit one file.
//!
//! Data is staged in hidden files next to the destination and only moved
//! onto the destination path by a rename, so an interrupted transfer never
//! leaves a partial file under its final name.

use super::expand::PlannedFile;
use super::progress::{FileProgress, TransferProgress};
use crate::codec::{self, Decoder};
use crate::config::TransferOptions;
use crate::error::{Error, Result};
use crate::provider::{ByteStream, SourceProvider};
use crate::retry::{RetryPolicy, download_with_retry};
use crate::types::{Outcome, SkipReason, TargetReport};
use crate::utils::{commit, format_bytes, remove_if_exists, temp_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// State shared by every transfer of one run
pub(super) struct TransferContext {
    pub(super) provider: Arc<dyn SourceProvider>,
    pub(super) options: TransferOptions,
    pub(super) decoder: Decoder,
    pub(super) policy: RetryPolicy,
    pub(super) cancel: CancellationToken,
    pub(super) progress: TransferProgress,
}

/// Final path of a planned file under the destination root
pub(super) fn destination_for(root: &Path, file: &PlannedFile) -> PathBuf {
    root.join(&file.relative)
}

/// Transfer one file to its destination, retrying transient failures.
///
/// Never fails: every outcome is recorded in the returned report.
pub(super) async fn transfer_file(ctx: &TransferContext, file: PlannedFile) -> TargetReport {
    let started = Instant::now();
    let source = file.entry.path.clone();
    let destination = destination_for(&ctx.options.destination_root, &file);

    if ctx.cancel.is_cancelled() {
        ctx.progress.skip_file(file.entry.size);
        return TargetReport::untouched(
            source,
            Some(destination),
            Outcome::skipped(SkipReason::Cancelled),
        );
    }

    if !ctx.options.overwrite {
        match tokio::fs::try_exists(&destination).await {
            Ok(true) => {
                tracing::debug!(path = %source, destination = %destination.display(), "Destination exists, skipping");
                ctx.progress.skip_file(file.entry.size);
                return TargetReport::untouched(
                    source,
                    Some(destination),
                    Outcome::skipped(SkipReason::AlreadyExists),
                );
            }
            Ok(false) => {}
            Err(e) => {
                let e = Error::Io(e);
                tracing::error!(path = %source, error = %e, "Could not check destination");
                ctx.progress.skip_file(file.entry.size);
                return TargetReport::untouched(source, Some(destination), Outcome::failed(&e));
            }
        }
    }

    let decode = codec::is_dbc_name(&file.entry.name);
    let progress = ctx.progress.start_file(&file.entry.name, file.entry.size);
    let transferred = AtomicU64::new(0);

    tracing::debug!(
        path = %source,
        destination = %destination.display(),
        decode,
        "Starting transfer"
    );

    let attempted = download_with_retry(&ctx.policy, &ctx.cancel, || {
        attempt(ctx, &source, &destination, decode, &progress, &transferred)
    })
    .await;
    progress.finish();

    let bytes_transferred = transferred.load(Ordering::Relaxed);
    let mut report = TargetReport {
        source,
        destination: Some(destination),
        bytes_transferred,
        bytes_written: 0,
        retries: attempted.retries,
        elapsed: started.elapsed(),
        decoded: false,
        outcome: Outcome::Succeeded,
    };

    match attempted.result {
        Ok(written) => {
            report.bytes_written = written;
            report.decoded = decode;
            tracing::debug!(
                path = %report.source,
                read = %format_bytes(bytes_transferred),
                written = %format_bytes(written),
                retries = report.retries,
                "Transfer finished"
            );
        }
        Err(e) => {
            // Errors surfacing after cancellation are reported as the cancellation itself
            let e = if ctx.cancel.is_cancelled() {
                Error::Cancelled
            } else {
                e
            };
            if matches!(e, Error::Cancelled) {
                tracing::info!(path = %report.source, "Transfer cancelled");
            } else {
                tracing::error!(
                    path = %report.source,
                    error = %e,
                    retries = report.retries,
                    "Transfer failed"
                );
            }
            report.outcome = Outcome::failed(&e);
        }
    }
    report
}

/// One attempt: fetch into a staging file, decode if needed, commit.
/// Returns the number of bytes committed at the destination.
async fn attempt(
    ctx: &TransferContext,
    source: &str,
    destination: &Path,
    decode: bool,
    progress: &FileProgress,
    transferred: &AtomicU64,
) -> Result<u64> {
    let previous = transferred.swap(0, Ordering::Relaxed);
    if previous > 0 {
        progress.rewind(previous);
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = Staging {
        download: temp_path(destination, "part")?,
        decoded: temp_path(destination, "dbf")?,
        decode,
    };

    let result = stage_and_commit(ctx, source, destination, &staging, progress, transferred).await;

    if result.is_err() {
        for staged in [&staging.download, &staging.decoded] {
            if let Err(e) = remove_if_exists(staged).await {
                tracing::warn!(path = %staged.display(), error = %e, "Could not remove staging file");
            }
        }
    }
    result
}

/// Staging files of one attempt
struct Staging {
    /// Raw bytes as fetched
    download: PathBuf,
    /// Decoder output, used only when `decode` is set
    decoded: PathBuf,
    decode: bool,
}

async fn stage_and_commit(
    ctx: &TransferContext,
    source: &str,
    destination: &Path,
    staging: &Staging,
    progress: &FileProgress,
    transferred: &AtomicU64,
) -> Result<u64> {
    let mut stream = ctx.provider.fetch(source).await?;
    copy_chunks(ctx, &mut stream, &staging.download, progress, transferred).await?;

    let staged = if staging.decode {
        let stats = ctx
            .decoder
            .decode_file(&staging.download, &staging.decoded)
            .await?;
        remove_if_exists(&staging.download).await?;
        tracing::debug!(
            path = %source,
            records = stats.record_count,
            header_size = stats.header_size,
            "Decoded DBC payload"
        );
        &staging.decoded
    } else {
        &staging.download
    };

    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let written = tokio::fs::metadata(staged).await?.len();
    commit(staged, destination).await?;
    Ok(written)
}

/// Stream `source` into a new file at `staging` in chunks of
/// `transfer_buffer_bytes`, stopping at the first chunk boundary after
/// cancellation
async fn copy_chunks(
    ctx: &TransferContext,
    source: &mut ByteStream,
    staging: &Path,
    progress: &FileProgress,
    transferred: &AtomicU64,
) -> Result<()> {
    let mut out = tokio::fs::File::create(staging).await?;
    let mut buf = vec![0u8; ctx.options.transfer_buffer_bytes];

    loop {
        let n = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            read = source.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        transferred.fetch_add(n as u64, Ordering::Relaxed);
        progress.advance(n as u64);
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}
