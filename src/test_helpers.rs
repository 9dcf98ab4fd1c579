//! Shared test helpers: an in-memory [`SourceProvider`] with scriptable failures.

use crate::error::{Error, Result};
use crate::provider::{ByteStream, SourceProvider, normalize_path, split_path};
use crate::types::{DirectoryListing, FileEntry};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Builds the error returned by a scripted failure
pub(crate) type ErrorFn = fn() -> Error;

/// In-memory provider tree.
///
/// Every mutator takes `&self`, so the tree can be changed while the
/// provider is shared behind an `Arc`.
#[derive(Default)]
pub(crate) struct MockProvider {
    dirs: Mutex<HashMap<String, DirectoryListing>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    aliases: Mutex<HashMap<String, String>>,
    list_failures: Mutex<HashMap<String, ErrorFn>>,
    fetch_failures: Mutex<HashMap<String, VecDeque<ErrorFn>>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    list_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    chunk_delay: Option<Duration>,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Delay every `list_directory` call
    pub(crate) fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Delay every `fetch` call before the stream is returned
    pub(crate) fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Deliver fetched data in 16-byte chunks, pausing before each
    pub(crate) fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Create a directory and all of its ancestors
    pub(crate) fn add_dir(&self, path: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = normalize_path(path);
        dirs.entry(current.clone()).or_default();
        while let (Some(parent), name) = split_path(&current) {
            let listing = dirs.entry(parent.clone()).or_default();
            if !listing.subdirectories.contains(&name) {
                listing.subdirectories.push(name);
                listing.subdirectories.sort();
            }
            current = parent;
        }
    }

    /// Add a file with contents, creating its parent directories
    pub(crate) fn add_file(&self, path: &str, data: &[u8]) {
        let path = normalize_path(path);
        let (_, name) = split_path(&path);
        self.add_entry(FileEntry::new(&path, name, "mock").with_size(data.len() as u64));
        self.files.lock().unwrap().insert(path, data.to_vec());
    }

    /// Add a listed file whose size is unknown
    pub(crate) fn add_unsized_file(&self, path: &str, data: &[u8]) {
        let path = normalize_path(path);
        let (_, name) = split_path(&path);
        self.add_entry(FileEntry::new(&path, name, "mock"));
        self.files.lock().unwrap().insert(path, data.to_vec());
    }

    fn add_entry(&self, entry: FileEntry) {
        let parent = split_path(&entry.path).0.unwrap_or_else(|| "/".to_string());
        self.add_dir(&parent);
        let mut dirs = self.dirs.lock().unwrap();
        let listing = dirs.entry(parent).or_default();
        listing.files.retain(|f| f.name != entry.name);
        listing.files.push(entry);
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Make `path` report `canonical` as its canonical path
    pub(crate) fn alias(&self, path: &str, canonical: &str) {
        self.aliases
            .lock()
            .unwrap()
            .insert(normalize_path(path), normalize_path(canonical));
    }

    /// Make every listing of `path` fail
    pub(crate) fn fail_list(&self, path: &str, error: ErrorFn) {
        self.list_failures
            .lock()
            .unwrap()
            .insert(normalize_path(path), error);
    }

    /// Make the next `times` fetches of `path` fail
    pub(crate) fn fail_fetch(&self, path: &str, times: usize, error: ErrorFn) {
        self.fetch_failures
            .lock()
            .unwrap()
            .entry(normalize_path(path))
            .or_default()
            .extend(std::iter::repeat_n(error, times));
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_calls(&self, path: &str) -> usize {
        self.fetch_counts
            .lock()
            .unwrap()
            .get(&normalize_path(path))
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of `fetch` calls observed at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SourceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        let path = normalize_path(path);
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.list_failures.lock().unwrap().get(&path) {
            return Err(error());
        }
        self.dirs
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .ok_or(Error::NotFound(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        Ok(self.dirs.lock().unwrap().contains_key(&path)
            || self.files.lock().unwrap().contains_key(&path))
    }

    async fn is_directory(&self, path: &str) -> Result<bool> {
        Ok(self.dirs.lock().unwrap().contains_key(&normalize_path(path)))
    }

    async fn fetch(&self, path: &str) -> Result<ByteStream> {
        let path = normalize_path(path);
        *self
            .fetch_counts
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .fetch_failures
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error());
        }

        let data = self
            .files
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.clone()))?;

        match self.chunk_delay {
            None => Ok(Box::pin(std::io::Cursor::new(data))),
            Some(delay) => {
                let chunks: Vec<Bytes> = data.chunks(16).map(Bytes::copy_from_slice).collect();
                let stream = futures::stream::iter(chunks).then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, std::io::Error>(chunk)
                });
                Ok(Box::pin(tokio_util::io::StreamReader::new(Box::pin(stream))))
            }
        }
    }

    async fn canonical_path(&self, path: &str) -> Result<String> {
        let path = normalize_path(path);
        Ok(self
            .aliases
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or(path))
    }
}
