//! Download orchestrator split into focused submodules.
//!
//! A [`Downloader`] run is organized in stages:
//! - [`expand`] - Directory targets expanded into a flat, de-duplicated file list
//! - [`transfer`] - Per-file fetch, decode, atomic commit, and retry
//! - [`progress`] - indicatif progress bars
//!
//! Transfers run through `buffer_unordered`, so at most
//! [`TransferOptions::concurrency`] are in flight and completion order is
//! unspecified. Every scheduled file ends as a success, a skip or a failure
//! in the returned [`TransferReport`].

mod expand;
mod progress;
mod transfer;


use crate::codec::Decoder;
use crate::config::{DecodeOptions, TransferOptions};
use crate::error::Result;
use crate::provider::SourceProvider;
use crate::retry::RetryPolicy;
use crate::types::{DownloadTarget, TransferReport};
use crate::utils::format_bytes;
use futures::StreamExt;
use progress::TransferProgress;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use transfer::TransferContext;

/// Downloads files from one provider into a local destination root
///
/// # Example
///
/// ```no_run
/// use datasus_dl::{Downloader, DownloadTarget, FtpProvider, TransferOptions};
/// use std::sync::Arc;
///
/// # async fn example() -> datasus_dl::Result<()> {
/// let provider = Arc::new(FtpProvider::datasus()?);
/// let options = TransferOptions {
///     destination_root: "./dados".into(),
///     max_recursion_depth: Some(0),
///     ..Default::default()
/// };
///
/// let report = Downloader::new(provider, options)
///     .run(vec![DownloadTarget::Directory("SIASUS/200801_/Dados".into())])
///     .await?;
/// println!("{} files downloaded", report.totals.succeeded);
/// # Ok(())
/// # }
/// ```
pub struct Downloader {
    provider: Arc<dyn SourceProvider>,
    options: TransferOptions,
    decoder: Decoder,
}

impl Downloader {
    /// Create a downloader. Options are validated when a run starts.
    pub fn new(provider: Arc<dyn SourceProvider>, options: TransferOptions) -> Self {
        Self {
            provider,
            options,
            decoder: Decoder::default(),
        }
    }

    /// Use non-default decoder options for `.dbc` files
    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.decoder = Decoder::new(options);
        self
    }

    /// Options used for every run
    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Provider files are fetched from
    pub fn provider(&self) -> &Arc<dyn SourceProvider> {
        &self.provider
    }

    /// Download all targets.
    ///
    /// Per-file failures are recorded in the report; only invalid options
    /// produce an `Err`.
    pub async fn run(&self, targets: Vec<DownloadTarget>) -> Result<TransferReport> {
        self.run_with_cancel(targets, CancellationToken::new()).await
    }

    /// Download all targets, cancelling whatever is unfinished after `timeout`
    pub async fn run_with_timeout(
        &self,
        targets: Vec<DownloadTarget>,
        timeout: Duration,
    ) -> Result<TransferReport> {
        let cancel = CancellationToken::new();
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(timeout_ms = timeout.as_millis(), "Download run timed out, cancelling");
                cancel.cancel();
            })
        };

        let report = self.run_with_cancel(targets, cancel).await;
        timer.abort();
        report
    }

    /// Download all targets until `cancel` fires.
    ///
    /// After cancellation no new transfer starts (remaining files are
    /// skipped), in-flight transfers stop at their next chunk and remove
    /// their staging files, and the report is marked as cancelled.
    pub async fn run_with_cancel(
        &self,
        targets: Vec<DownloadTarget>,
        cancel: CancellationToken,
    ) -> Result<TransferReport> {
        self.options.validate()?;
        let started = Instant::now();

        tracing::info!(
            provider = self.provider.name(),
            targets = targets.len(),
            concurrency = self.options.concurrency,
            destination = %self.options.destination_root.display(),
            "Starting download run"
        );

        let plan = expand::expand_targets(
            &self.provider,
            targets,
            self.options.max_recursion_depth,
            &cancel,
        )
        .await;

        let total_bytes = plan.files.iter().map(|f| f.entry.size).sum::<Option<u64>>();
        let ctx = TransferContext {
            provider: Arc::clone(&self.provider),
            options: self.options.clone(),
            decoder: self.decoder,
            policy: RetryPolicy::from(&self.options),
            cancel: cancel.clone(),
            progress: TransferProgress::new(self.options.progress_mode, total_bytes, plan.files.len()),
        };

        let mut reports = plan.reports;
        let transfers: Vec<_> = futures::stream::iter(plan.files)
            .map(|file| transfer::transfer_file(&ctx, file))
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;
        reports.extend(transfers);
        ctx.progress.finish();

        let report = TransferReport::new(reports, started.elapsed(), cancel.is_cancelled());
        tracing::info!(
            succeeded = report.totals.succeeded,
            skipped = report.totals.skipped,
            failed = report.totals.failed,
            retries = report.totals.retries,
            written = %format_bytes(report.totals.bytes_written),
            elapsed_ms = report.elapsed.as_millis(),
            cancelled = report.cancelled,
            "Download run finished"
        );
        Ok(report)
    }
}
