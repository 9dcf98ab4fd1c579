//! Source providers -- uniform listing and fetching across storage media.
//!
//! Split into focused submodules:
//! - [`local`] - Local filesystem provider
//! - [`ftp`] - Anonymous FTP provider with a small session pool
//!
//! Paths handed to a provider are `/`-separated strings. Each provider
//! resolves them against its own root (a local base directory, or the FTP
//! base path).

pub mod ftp;
pub mod local;

use crate::error::Result;
use crate::types::DirectoryListing;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub use ftp::FtpProvider;
pub use local::LocalProvider;

/// Byte stream returned by [`SourceProvider::fetch`]
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Capability-based access to one storage medium.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many transfers at once.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short name recorded in [`FileEntry::provider`](crate::types::FileEntry::provider)
    fn name(&self) -> &str;

    /// List the files and subdirectories directly under `path`.
    ///
    /// Fails with `NotFound` when the path does not exist and with
    /// `Connection` for transport failures.
    async fn list_directory(&self, path: &str) -> Result<DirectoryListing>;

    /// Whether `path` exists. A merely absent path is `Ok(false)`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Whether `path` exists and is a directory
    async fn is_directory(&self, path: &str) -> Result<bool>;

    /// Open the file at `path` for streaming
    async fn fetch(&self, path: &str) -> Result<ByteStream>;

    /// Identity of `path` used to detect directory cycles
    async fn canonical_path(&self, path: &str) -> Result<String> {
        Ok(normalize_path(path))
    }

    /// `/`-separated path, relative to the provider root, under which a
    /// download of `path` is written
    fn mirror_path(&self, path: &str) -> String {
        normalize_path(path).trim_start_matches('/').to_string()
    }
}

/// Collapse repeated separators and resolve `.` and `..` lexically.
///
/// The result always starts with `/` and never ends with one, except for
/// the root itself. `..` at the root stays at the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a child name onto a directory path
pub fn join_path(dir: &str, name: &str) -> String {
    normalize_path(&format!("{dir}/{name}"))
}

/// Split a path into its normalized parent and final component.
///
/// The root has no parent and an empty name.
pub fn split_path(path: &str) -> (Option<String>, String) {
    let normalized = normalize_path(path);
    match normalized.rsplit_once('/') {
        Some((_, "")) | None => (None, String::new()),
        Some(("", name)) => (Some("/".to_string()), name.to_string()),
        Some((parent, name)) => (Some(parent.to_string()), name.to_string()),
    }
}

/// Final component of a path (empty for the root)
pub fn file_name(path: &str) -> String {
    split_path(path).1
}

/// Path of `path` relative to `base`, when `path` lies under it
pub fn relative_to(base: &str, path: &str) -> Option<String> {
    let base = normalize_path(base);
    let path = normalize_path(path);
    if base == "/" {
        return Some(path.trim_start_matches('/').to_string());
    }
    if path == base {
        return Some(String::new());
    }
    path.strip_prefix(&base)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}
