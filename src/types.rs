//! Core types for datasus-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::duration_ms_serde;
use crate::error::{Error, ErrorKind};

/// A file as reported by a provider listing
///
/// Immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Full path on the provider, as accepted by `fetch`
    pub path: String,
    /// Final path component
    pub name: String,
    /// Size in bytes (None when the listing or metadata lookup did not provide it)
    pub size: Option<u64>,
    /// Last modification time, when known
    pub modified: Option<DateTime<Utc>>,
    /// Name of the provider that listed this file
    pub provider: String,
}

impl FileEntry {
    /// Create an entry with no size or timestamp
    pub fn new(path: impl Into<String>, name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size: None,
            modified: None,
            provider: provider.into(),
        }
    }

    /// Set the size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Extension of the file name without the dot, if any
    pub fn extension(&self) -> Option<&str> {
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Case-insensitive extension check; `ext` may carry a leading dot
    pub fn has_extension(&self, ext: &str) -> bool {
        let wanted = ext.trim_start_matches('.');
        self.extension()
            .is_some_and(|actual| actual.eq_ignore_ascii_case(wanted))
    }
}

/// One directory's contents: files and subdirectory names, disjoint and ordered
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    /// Files directly inside the directory
    pub files: Vec<FileEntry>,
    /// Names of the subdirectories directly inside the directory
    pub subdirectories: Vec<String>,
}

impl DirectoryListing {
    /// True when the directory has neither files nor subdirectories
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.subdirectories.is_empty()
    }
}

/// Something to download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum DownloadTarget {
    /// A single listed file
    File(FileEntry),
    /// A directory path, expanded recursively
    Directory(String),
}

impl DownloadTarget {
    /// Provider path this target refers to
    pub fn path(&self) -> &str {
        match self {
            DownloadTarget::File(entry) => &entry.path,
            DownloadTarget::Directory(path) => path,
        }
    }
}

impl From<FileEntry> for DownloadTarget {
    fn from(entry: FileEntry) -> Self {
        DownloadTarget::File(entry)
    }
}

/// Why a target was not transferred
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Destination exists and overwrite is disabled
    AlreadyExists,
    /// Directory lies beyond the configured recursion depth
    DepthLimit,
    /// Directory resolves to one already visited
    Cycle,
    /// The run was cancelled before this target started
    Cancelled,
}

/// Terminal state of one target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// File written to its destination
    Succeeded,
    /// Target deliberately not transferred
    Skipped {
        /// Why it was skipped
        reason: SkipReason,
    },
    /// Target failed after any retries
    Failed {
        /// Error classification
        kind: ErrorKind,
        /// Human-readable error message
        message: String,
    },
}

impl Outcome {
    /// Skipped with the given reason
    pub fn skipped(reason: SkipReason) -> Self {
        Outcome::Skipped { reason }
    }

    /// Failed with the given error
    pub fn failed(error: &Error) -> Self {
        Outcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// True for [`Outcome::Succeeded`]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    /// True for [`Outcome::Skipped`]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    /// True for [`Outcome::Failed`]
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Per-target entry of a [`TransferReport`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    /// Provider path of the file or directory
    pub source: String,
    /// Local path the file was (or would have been) written to
    pub destination: Option<PathBuf>,
    /// Bytes read from the provider (last attempt)
    pub bytes_transferred: u64,
    /// Bytes committed at the destination
    pub bytes_written: u64,
    /// Retries performed after the first attempt
    pub retries: usize,
    /// Time spent on this target
    #[serde(with = "duration_ms_serde")]
    pub elapsed: Duration,
    /// Whether the payload went through the DBC decoder
    pub decoded: bool,
    /// Terminal state
    pub outcome: Outcome,
}

impl TargetReport {
    /// Report for a target that ended without transferring anything
    pub fn untouched(source: impl Into<String>, destination: Option<PathBuf>, outcome: Outcome) -> Self {
        Self {
            source: source.into(),
            destination,
            bytes_transferred: 0,
            bytes_written: 0,
            retries: 0,
            elapsed: Duration::ZERO,
            decoded: false,
            outcome,
        }
    }
}

/// Aggregate counters over all targets of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    /// Targets that succeeded
    pub succeeded: usize,
    /// Targets that were skipped
    pub skipped: usize,
    /// Targets that failed
    pub failed: usize,
    /// Bytes read from providers
    pub bytes_transferred: u64,
    /// Bytes committed at destinations
    pub bytes_written: u64,
    /// Retries across all targets
    pub retries: usize,
}

impl ReportTotals {
    /// Sum the counters of a set of target reports
    pub fn from_targets(targets: &[TargetReport]) -> Self {
        targets.iter().fold(Self::default(), |mut totals, target| {
            match target.outcome {
                Outcome::Succeeded => totals.succeeded += 1,
                Outcome::Skipped { .. } => totals.skipped += 1,
                Outcome::Failed { .. } => totals.failed += 1,
            }
            totals.bytes_transferred += target.bytes_transferred;
            totals.bytes_written += target.bytes_written;
            totals.retries += target.retries;
            totals
        })
    }
}

/// Result of one download run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    /// One entry per file, plus one per skipped or failed directory
    pub targets: Vec<TargetReport>,
    /// Aggregate counters
    pub totals: ReportTotals,
    /// Wall-clock time of the whole run
    #[serde(with = "duration_ms_serde")]
    pub elapsed: Duration,
    /// Whether the run was cancelled before completing
    pub cancelled: bool,
}

impl TransferReport {
    /// Build a report, computing totals from the targets
    pub fn new(targets: Vec<TargetReport>, elapsed: Duration, cancelled: bool) -> Self {
        let totals = ReportTotals::from_targets(&targets);
        Self {
            targets,
            totals,
            elapsed,
            cancelled,
        }
    }

    /// True when every target succeeded or was skipped and the run was not cancelled
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.totals.failed == 0
    }

    /// True when at least one target failed
    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }

    /// Reports for failed targets
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets.iter().filter(|t| t.outcome.is_failure())
    }

    /// Report for a given source path
    pub fn get(&self, source: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.source == source)
    }
}
