//! # datasus-dl
//!
//! Download and decompress DATASUS health-record files.
//!
//! DATASUS publishes its public microdata as `.dbc` files: dBase (`.dbf`)
//! tables whose record area is compressed with the PKWARE DCL "implode"
//! algorithm. This crate provides:
//! - **A codec** ([`codec`]) that turns a `.dbc` container back into the
//!   byte-exact `.dbf` file, streaming or in memory
//! - **Source providers** ([`provider`]) with one interface over a local
//!   mirror and the anonymous DATASUS FTP server
//! - **Directory handles** ([`directory`]) with cached listings
//! - **A download orchestrator** ([`downloader`]) with bounded concurrency,
//!   retry with exponential backoff, progress bars, cancellation, and a
//!   per-file report
//!
//! The crate emits `tracing` events and never installs a subscriber.
//!
//! ## Quick Start
//!
//! ```no_run
//! use datasus_dl::{DownloadTarget, Downloader, FtpProvider, ProgressMode, TransferOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(FtpProvider::datasus()?);
//!
//!     let options = TransferOptions {
//!         destination_root: "./dados".into(),
//!         progress_mode: ProgressMode::Multi,
//!         ..Default::default()
//!     };
//!
//!     let report = Downloader::new(provider, options)
//!         .run(vec![DownloadTarget::Directory("SIASUS/200801_/Dados".into())])
//!         .await?;
//!
//!     for failure in report.failures() {
//!         eprintln!("{}: {:?}", failure.source, failure.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Decoding a single file:
//!
//! ```no_run
//! # async fn example() -> datasus_dl::Result<()> {
//! use std::path::Path;
//!
//! let stats = datasus_dl::codec::decode_file(
//!     Path::new("RDAC0801.dbc"),
//!     Path::new("RDAC0801.dbf"),
//! )
//! .await?;
//! println!("{} records", stats.record_count);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// DBC container decoding
pub mod codec;
/// Configuration types
pub mod config;
/// Lazily loaded directory handles
pub mod directory;
/// Download orchestrator
pub mod downloader;
/// Error types
pub mod error;
/// Source providers (local filesystem, FTP)
pub mod provider;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and reports
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use codec::{DbcHeader, DecodeStats, Decoder};
pub use config::{DecodeOptions, FtpConfig, ProgressMode, TransferOptions};
pub use directory::{Directory, DirectorySize};
pub use downloader::Downloader;
pub use error::{Error, ErrorKind, ExplodeError, Result};
pub use provider::{ByteStream, FtpProvider, LocalProvider, SourceProvider};
pub use types::{
    DirectoryListing, DownloadTarget, FileEntry, Outcome, ReportTotals, SkipReason, TargetReport,
    TransferReport,
};

/// Run a download until it finishes or a termination signal arrives.
///
/// On a signal the run is cancelled as with
/// [`Downloader::run_with_cancel`] and the partial report is returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use datasus_dl::{DownloadTarget, Downloader, LocalProvider, TransferOptions, run_until_signal};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let provider = Arc::new(LocalProvider::new("/mnt/espelho"));
///     let downloader = Downloader::new(provider, TransferOptions::default());
///
///     let report = run_until_signal(&downloader, vec![DownloadTarget::Directory("SIHSUS".into())]).await?;
///     if report.cancelled {
///         eprintln!("interrupted");
///     }
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(
    downloader: &Downloader,
    targets: Vec<DownloadTarget>,
) -> Result<TransferReport> {
    let cancel = tokio_util::sync::CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Cancelling downloads after termination signal");
            cancel.cancel();
        })
    };

    let report = downloader.run_with_cancel(targets, cancel).await;
    watcher.abort();
    report
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn run_until_signal_completes_without_a_signal() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"a").unwrap();

        let provider = Arc::new(LocalProvider::new(src.path()));
        let options = TransferOptions {
            destination_root: dest.path().to_path_buf(),
            ..Default::default()
        };
        let downloader = Downloader::new(provider, options);

        let report = run_until_signal(&downloader, vec![DownloadTarget::Directory("/".into())])
            .await
            .unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.totals.succeeded, 1);
        assert!(dest.path().join("a.txt").exists());
    }
}
