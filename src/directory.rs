//! Lazily loaded directory handles
//!
//! A [`Directory`] names one path on a [`SourceProvider`] and caches that
//! path's listing. The first [`load`](Directory::load) performs a single
//! provider call that concurrent callers share; [`reload`](Directory::reload)
//! swaps in a fresh snapshot while readers holding the old one keep it.

use crate::error::{Error, Result};
use crate::provider::{SourceProvider, file_name, join_path, normalize_path, split_path};
use crate::types::{DirectoryListing, FileEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Handle on one directory of a provider
pub struct Directory {
    provider: Arc<dyn SourceProvider>,
    path: String,
    name: String,
    snapshot: RwLock<Option<Arc<DirectoryListing>>>,
    loading: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("provider", &self.provider.name())
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Directory {
    /// Handle on `path`. Nothing is listed until the first load.
    pub fn new(provider: Arc<dyn SourceProvider>, path: &str) -> Self {
        let path = normalize_path(path);
        let name = match file_name(&path) {
            name if name.is_empty() => "/".to_string(),
            name => name,
        };
        Self {
            provider,
            path,
            name,
            snapshot: RwLock::new(None),
            loading: tokio::sync::Mutex::new(()),
        }
    }

    /// Normalized provider path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path component (`/` for the root)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider this directory lives on
    pub fn provider(&self) -> &Arc<dyn SourceProvider> {
        &self.provider
    }

    /// Whether a listing snapshot is cached
    pub fn is_loaded(&self) -> bool {
        self.cached().is_some()
    }

    fn cached(&self) -> Option<Arc<DirectoryListing>> {
        self.snapshot.read().ok().and_then(|guard| guard.clone())
    }

    fn store(&self, listing: DirectoryListing) -> Arc<DirectoryListing> {
        let listing = Arc::new(listing);
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Some(Arc::clone(&listing));
        }
        listing
    }

    /// Cached listing, fetching it on first use
    pub async fn load(&self) -> Result<Arc<DirectoryListing>> {
        if let Some(listing) = self.cached() {
            return Ok(listing);
        }

        let _loading = self.loading.lock().await;
        // Another caller may have finished the load while we waited
        if let Some(listing) = self.cached() {
            return Ok(listing);
        }

        let listing = self.provider.list_directory(&self.path).await?;
        tracing::debug!(
            path = %self.path,
            files = listing.files.len(),
            subdirectories = listing.subdirectories.len(),
            "Directory loaded"
        );
        Ok(self.store(listing))
    }

    /// Fetch a fresh listing and replace the cached one.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<Arc<DirectoryListing>> {
        let _loading = self.loading.lock().await;
        let listing = self.provider.list_directory(&self.path).await?;
        tracing::debug!(path = %self.path, files = listing.files.len(), "Directory reloaded");
        Ok(self.store(listing))
    }

    /// Files directly in this directory, in listing order
    pub async fn files(&self) -> Result<Vec<FileEntry>> {
        Ok(self.load().await?.files.clone())
    }

    /// Files whose name ends in `ext`, compared case-insensitively.
    /// The leading dot is optional.
    pub async fn files_with_extension(&self, ext: &str) -> Result<Vec<FileEntry>> {
        let listing = self.load().await?;
        Ok(listing
            .files
            .iter()
            .filter(|file| file.has_extension(ext))
            .cloned()
            .collect())
    }

    /// Handles on the immediate subdirectories, not yet loaded
    pub async fn subdirectories(&self) -> Result<Vec<Directory>> {
        let listing = self.load().await?;
        Ok(listing
            .subdirectories
            .iter()
            .map(|name| self.child(name))
            .collect())
    }

    /// Handle on the named child directory
    pub fn child(&self, name: &str) -> Directory {
        Directory::new(Arc::clone(&self.provider), &join_path(&self.path, name))
    }

    /// Handle on the parent directory, `None` at the root
    pub fn parent(&self) -> Option<Directory> {
        let (parent, _) = split_path(&self.path);
        parent.map(|parent| Directory::new(Arc::clone(&self.provider), &parent))
    }

    /// Whether the directory exists on the provider. Does not load it.
    pub async fn exists(&self) -> Result<bool> {
        self.provider.exists(&self.path).await
    }

    /// Sum file sizes over this directory and everything below it.
    ///
    /// Subdirectories that cannot be listed and files without a known size
    /// are recorded in [`DirectorySize::failures`] and the walk continues.
    /// An error loading this directory itself is returned.
    pub async fn total_size(&self) -> Result<DirectorySize> {
        let mut size = DirectorySize::default();
        let mut visited = HashSet::new();
        visited.insert(self.provider.canonical_path(&self.path).await?);

        let mut pending = Vec::new();
        let listing = self.load().await?;
        self.accumulate(&listing, &mut size, &mut pending);

        while let Some(path) = pending.pop() {
            match self.provider.canonical_path(&path).await {
                Ok(canonical) => {
                    if !visited.insert(canonical) {
                        continue;
                    }
                }
                Err(e) => {
                    size.record_failure(&path, &e);
                    continue;
                }
            }
            match self.provider.list_directory(&path).await {
                Ok(listing) => {
                    let dir = Directory::new(Arc::clone(&self.provider), &path);
                    dir.accumulate(&listing, &mut size, &mut pending);
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Could not list directory while sizing");
                    size.record_failure(&path, &e);
                }
            }
        }

        tracing::debug!(
            path = %self.path,
            bytes = size.total_bytes,
            files = size.files,
            failures = size.failures.len(),
            "Directory size computed"
        );
        Ok(size)
    }

    fn accumulate(&self, listing: &DirectoryListing, size: &mut DirectorySize, pending: &mut Vec<String>) {
        for file in &listing.files {
            match file.size {
                Some(bytes) => {
                    size.total_bytes += bytes;
                    size.files += 1;
                }
                None => size.failures.push(SizeFailure {
                    path: file.path.clone(),
                    reason: "size unknown".to_string(),
                }),
            }
        }
        pending.extend(listing.subdirectories.iter().map(|name| join_path(&self.path, name)));
    }
}

/// Result of [`Directory::total_size`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySize {
    /// Sum of all known file sizes
    pub total_bytes: u64,
    /// Number of files counted in `total_bytes`
    pub files: usize,
    /// Paths that could not be accounted for
    pub failures: Vec<SizeFailure>,
}

impl DirectorySize {
    fn record_failure(&mut self, path: &str, error: &Error) {
        self.failures.push(SizeFailure {
            path: path.to_string(),
            reason: error.to_string(),
        });
    }
}

/// A path skipped while sizing a directory tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeFailure {
    /// Provider path of the file or directory
    pub path: String,
    /// Why it was skipped
    pub reason: String,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockProvider;
    use std::time::Duration;

    fn siasus() -> Arc<MockProvider> {
        let provider = MockProvider::new();
        provider.add_file("/SIASUS/PAAC0801.dbc", b"0123456789");
        provider.add_file("/SIASUS/RDAC0801.DBC", b"01234");
        provider.add_file("/SIASUS/readme.txt", b"hi");
        provider.add_file("/SIASUS/200801_/PAAC0802.dbc", b"0123");
        provider.add_dir("/SIASUS/vazio");
        Arc::new(provider)
    }

    // -----------------------------------------------------------------------
    // Loading and caching
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn load_lists_once_and_caches() {
        let provider = siasus();
        let dir = Directory::new(provider.clone(), "SIASUS");
        assert!(!dir.is_loaded());

        let first = dir.load().await.unwrap();
        let second = dir.load().await.unwrap();

        assert!(dir.is_loaded());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.list_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_loads_share_one_listing() {
        let provider = Arc::new({
            let provider = MockProvider::new().with_list_delay(Duration::from_millis(20));
            provider.add_file("/SIASUS/PAAC0801.dbc", b"x");
            provider
        });
        let dir = Arc::new(Directory::new(provider.clone(), "/SIASUS"));

        let loads = (0..8).map(|_| {
            let dir = dir.clone();
            async move { dir.load().await.unwrap() }
        });
        let results = futures::future::join_all(loads).await;

        assert_eq!(provider.list_calls(), 1);
        assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test]
    async fn reload_replaces_snapshot() {
        let provider = siasus();
        let dir = Directory::new(provider.clone(), "/SIASUS");

        let before = dir.load().await.unwrap();
        provider.add_file("/SIASUS/SPAC0801.dbc", b"new");

        // Cached until reloaded
        assert_eq!(dir.files().await.unwrap().len(), 3);

        let after = dir.reload().await.unwrap();
        assert_eq!(after.files.len(), 4);
        assert_eq!(dir.files().await.unwrap().len(), 4);
        assert_eq!(before.files.len(), 3, "earlier snapshot is unchanged");
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_snapshot() {
        let provider = siasus();
        let dir = Directory::new(provider.clone(), "/SIASUS");
        dir.load().await.unwrap();

        provider.fail_list("/SIASUS", || Error::Connection("reset".into()));
        assert!(dir.reload().await.is_err());
        assert_eq!(dir.files().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn load_of_missing_directory_fails() {
        let dir = Directory::new(siasus(), "/SIHSUS");
        assert!(matches!(dir.load().await, Err(Error::NotFound(_))));
        assert!(!dir.is_loaded());
        assert!(!dir.exists().await.unwrap());
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn extension_filter_ignores_case_and_dot() {
        let dir = Directory::new(siasus(), "/SIASUS");

        let with_dot: Vec<_> = dir
            .files_with_extension(".dbc")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        let without_dot: Vec<_> = dir
            .files_with_extension("DBC")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();

        assert_eq!(with_dot, ["PAAC0801.dbc", "RDAC0801.DBC"]);
        assert_eq!(with_dot, without_dot);
        assert!(dir.files_with_extension("dbf").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subdirectories_and_parent_navigate_the_tree() {
        let dir = Directory::new(siasus(), "/SIASUS");
        let subdirs = dir.subdirectories().await.unwrap();

        let paths: Vec<_> = subdirs.iter().map(Directory::path).collect();
        assert_eq!(paths, ["/SIASUS/200801_", "/SIASUS/vazio"]);
        assert!(!subdirs[0].is_loaded());
        assert_eq!(subdirs[0].name(), "200801_");

        let parent = subdirs[0].parent().unwrap();
        assert_eq!(parent.path(), "/SIASUS");
        let root = parent.parent().unwrap();
        assert_eq!(root.path(), "/");
        assert_eq!(root.name(), "/");
        assert!(root.parent().is_none());
    }

    #[tokio::test]
    async fn exists_does_not_load() {
        let provider = siasus();
        let dir = Directory::new(provider.clone(), "/SIASUS");
        assert!(dir.exists().await.unwrap());
        assert!(!dir.is_loaded());
        assert_eq!(provider.list_calls(), 0);
    }

    // -----------------------------------------------------------------------
    // total_size
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn total_size_walks_subdirectories() {
        let dir = Directory::new(siasus(), "/SIASUS");
        let size = dir.total_size().await.unwrap();

        assert_eq!(size.total_bytes, 10 + 5 + 2 + 4);
        assert_eq!(size.files, 4);
        assert!(size.failures.is_empty());
    }

    #[tokio::test]
    async fn total_size_records_failures_and_continues() {
        let provider = siasus();
        provider.add_file("/SIASUS/quebrado/X.dbc", b"xxxx");
        provider.fail_list("/SIASUS/quebrado", || Error::Connection("reset".into()));
        provider.add_unsized_file("/SIASUS/200801_/SEMTAMANHO.dbc", b"?");

        let size = Directory::new(provider, "/SIASUS").total_size().await.unwrap();

        assert_eq!(size.total_bytes, 21);
        assert_eq!(size.files, 4);
        let failed: Vec<_> = size.failures.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains(&"/SIASUS/quebrado"));
        assert!(failed.contains(&"/SIASUS/200801_/SEMTAMANHO.dbc"));
    }

    #[tokio::test]
    async fn total_size_does_not_loop_on_cycles() {
        let provider = siasus();
        provider.add_dir("/SIASUS/200801_/volta");
        provider.alias("/SIASUS/200801_/volta", "/SIASUS");

        let size = Directory::new(provider, "/SIASUS").total_size().await.unwrap();
        assert_eq!(size.files, 4);
    }
}
