//! Error types for datasus-dl
//!
//! This module provides the error taxonomy shared by the codec, the source
//! providers and the download orchestrator:
//! - Codec errors (`MissingHeader`, `InvalidHeaderSize`, `Decompression`)
//! - Provider errors (`NotFound`, `Connection`)
//! - I/O, configuration and cancellation errors
//! - A serializable [`ErrorKind`] used in transfer reports

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for datasus-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for datasus-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The container is shorter than the 10-byte pre-header
    #[error("missing DBC header: expected 10 bytes, found {available}")]
    MissingHeader {
        /// Number of bytes that were available
        available: usize,
    },

    /// The declared header size is invalid or runs past the end of the input
    #[error("invalid DBC header size {declared}: {reason}")]
    InvalidHeaderSize {
        /// Header size declared at pre-header offsets 8-9
        declared: u16,
        /// What went wrong with it
        reason: String,
    },

    /// The implode-compressed payload is malformed
    #[error("decompression error: {0}")]
    Decompression(#[from] ExplodeError),

    /// The requested path does not exist on the source
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure talking to a remote source
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures of the PKWARE DCL explode decoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExplodeError {
    /// First stream byte must be 0 (raw literals) or 1 (coded literals)
    #[error("invalid literal mode {0}")]
    InvalidLiteralMode(u8),

    /// Second stream byte must be 4, 5 or 6
    #[error("invalid dictionary size {0}")]
    InvalidDictionarySize(u8),

    /// A bit sequence did not match any Huffman code
    #[error("invalid Huffman code")]
    InvalidCode,

    /// A back-reference points before the start of the output
    #[error("distance {distance} too far back, only {available} bytes produced")]
    DistanceTooFar {
        /// Back-reference distance
        distance: usize,
        /// Bytes produced so far
        available: u64,
    },

    /// The compressed stream ended before the end-of-stream code
    #[error("compressed stream ended prematurely")]
    UnexpectedEof,
}

/// Machine-readable error classification stored in transfer reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Container shorter than the pre-header
    MissingHeader,
    /// Header size invalid or past end of input
    InvalidHeaderSize,
    /// Malformed compressed payload
    Decompression,
    /// Source path does not exist
    NotFound,
    /// Transport failure
    Connection,
    /// I/O failure
    Io,
    /// Invalid configuration
    Config,
    /// Cancelled by the caller
    Cancelled,
    /// Anything else
    Other,
}

impl ErrorKind {
    /// Stable string form, matching the serialized representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingHeader => "missing_header",
            ErrorKind::InvalidHeaderSize => "invalid_header_size",
            ErrorKind::Decompression => "decompression",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Connection => "connection",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingHeader { .. } => ErrorKind::MissingHeader,
            Error::InvalidHeaderSize { .. } => ErrorKind::InvalidHeaderSize,
            Error::Decompression(_) => ErrorKind::Decompression,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Io,
            Error::Config { .. } => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// True for transport-level failures that invalidate a connection
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Other(format!("background task failed: {err}"))
        }
    }
}
