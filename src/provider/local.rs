//! Local filesystem provider

use super::{ByteStream, SourceProvider, join_path, normalize_path};
use crate::error::{Error, Result};
use crate::types::{DirectoryListing, FileEntry};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Provider that reads from a directory tree on local disk.
///
/// Provider paths are resolved under `root`; `..` components cannot climb
/// above it.
#[derive(Clone, Debug)]
pub struct LocalProvider {
    root: PathBuf,
    name: String,
}

impl LocalProvider {
    /// Create a provider rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            name: "local".to_string(),
        }
    }

    /// Override the provider name recorded in listed entries
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Base directory of this provider
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a provider path
    pub fn resolve(&self, path: &str) -> PathBuf {
        let normalized = normalize_path(path);
        self.root.join(normalized.trim_start_matches('/'))
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new("/")
    }
}

fn map_not_found(err: std::io::Error, path: &str) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.to_string())
    } else {
        Error::Io(err)
    }
}

#[async_trait::async_trait]
impl SourceProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        let dir_path = normalize_path(path);
        let resolved = self.resolve(&dir_path);

        let mut read_dir = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| map_not_found(e, &dir_path))?;

        let mut listing = DirectoryListing::default();
        while let Some(entry) = read_dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(
                    dir = %resolved.display(),
                    entry = ?entry.file_name(),
                    "Skipping entry with non UTF-8 name"
                );
                continue;
            };

            // Follow symlinks so linked directories are listed as directories
            match tokio::fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_dir() => listing.subdirectories.push(name),
                Ok(meta) => {
                    let mut file = FileEntry::new(join_path(&dir_path, &name), name, &self.name)
                        .with_size(meta.len());
                    if let Ok(modified) = meta.modified() {
                        file = file.with_modified(DateTime::<Utc>::from(modified));
                    }
                    listing.files.push(file);
                }
                Err(e) => {
                    tracing::debug!(
                        path = %entry.path().display(),
                        error = %e,
                        "Metadata lookup failed, listing file without size"
                    );
                    listing
                        .files
                        .push(FileEntry::new(join_path(&dir_path, &name), name, &self.name));
                }
            }
        }

        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        listing.subdirectories.sort();

        tracing::debug!(
            path = %dir_path,
            files = listing.files.len(),
            subdirectories = listing.subdirectories.len(),
            "Listed local directory"
        );
        Ok(listing)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn is_directory(&self, path: &str) -> Result<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, path: &str) -> Result<ByteStream> {
        let file = tokio::fs::File::open(self.resolve(path))
            .await
            .map_err(|e| map_not_found(e, path))?;
        Ok(Box::pin(file))
    }

    async fn canonical_path(&self, path: &str) -> Result<String> {
        let canonical = tokio::fs::canonicalize(self.resolve(path))
            .await
            .map_err(|e| map_not_found(e, path))?;
        Ok(canonical.to_string_lossy().into_owned())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn tree() -> (tempfile::TempDir, LocalProvider) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        std::fs::create_dir_all(base.join("SIASUS/Dados")).unwrap();
        std::fs::write(base.join("SIASUS/PAAC0801.dbc"), b"bbb").unwrap();
        std::fs::write(base.join("SIASUS/ABAC0801.dbc"), b"aaaa").unwrap();
        std::fs::write(base.join("SIASUS/Dados/x.dbf"), b"x").unwrap();
        let provider = LocalProvider::new(base);
        (dir, provider)
    }

    #[tokio::test]
    async fn lists_sorted_files_and_subdirectories() {
        let (_dir, provider) = tree();

        let listing = provider.list_directory("/SIASUS").await.unwrap();

        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ABAC0801.dbc", "PAAC0801.dbc"]);
        assert_eq!(listing.files[0].path, "/SIASUS/ABAC0801.dbc");
        assert_eq!(listing.files[0].size, Some(4));
        assert!(listing.files[0].modified.is_some());
        assert_eq!(listing.files[0].provider, "local");
        assert_eq!(listing.subdirectories, ["Dados"]);
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let (_dir, provider) = tree();
        let err = provider.list_directory("/NOPE").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref p) if p == "/NOPE"));
    }

    #[tokio::test]
    async fn exists_and_is_directory_never_fail_for_absent_paths() {
        let (_dir, provider) = tree();
        assert!(provider.exists("/SIASUS/ABAC0801.dbc").await.unwrap());
        assert!(!provider.exists("/SIASUS/missing.dbc").await.unwrap());
        assert!(provider.is_directory("/SIASUS/Dados").await.unwrap());
        assert!(!provider.is_directory("/SIASUS/ABAC0801.dbc").await.unwrap());
        assert!(!provider.is_directory("/missing").await.unwrap());
    }

    #[tokio::test]
    async fn fetch_streams_file_contents() {
        let (_dir, provider) = tree();
        let mut stream = provider.fetch("/SIASUS/PAAC0801.dbc").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"bbb");

        let err = match provider.fetch("/SIASUS/none.dbc").await {
            Ok(_) => panic!("fetch of a missing file should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn parent_components_cannot_escape_root() {
        let (dir, provider) = tree();
        assert_eq!(provider.resolve("/../../etc/passwd"), dir.path().join("etc/passwd"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn canonical_path_resolves_symlinks() {
        let (dir, provider) = tree();
        std::os::unix::fs::symlink(dir.path().join("SIASUS"), dir.path().join("SIASUS/Dados/loop"))
            .unwrap();

        let direct = provider.canonical_path("/SIASUS").await.unwrap();
        let looped = provider.canonical_path("/SIASUS/Dados/loop").await.unwrap();
        assert_eq!(direct, looped);
    }
}
