//! Anonymous FTP provider
//!
//! Split into focused submodules:
//! - [`listing`] - `LIST` line parsing (Unix and MS-DOS formats)
//! - [`session`] - Session and connector traits, `suppaftp` implementation
//! - [`pool`] - Exclusive checkout of a small number of sessions
//!
//! Paths are resolved under the configured base path, so with the DATASUS
//! defaults `"SIASUS"`, `"/SIASUS"` and `"/dissemin/publicos/SIASUS"` all
//! name the same directory.

pub mod listing;
pub mod pool;
pub mod session;

use super::{ByteStream, SourceProvider, normalize_path, relative_to, split_path};
use crate::config::FtpConfig;
use crate::error::{Error, Result};
use crate::types::DirectoryListing;
use futures::future::BoxFuture;
use pool::{SessionPool, poisons_session};
use session::{FtpConnector, FtpSession, RetrievalSink, SuppaftpConnector};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Chunks buffered between the data connection and the consumer
const CHUNK_QUEUE: usize = 8;

/// Provider backed by an FTP server
pub struct FtpProvider {
    config: FtpConfig,
    pool: Arc<SessionPool>,
    name: String,
}

impl FtpProvider {
    /// Create a provider for the given endpoint. No connection is opened yet.
    pub fn new(config: FtpConfig) -> Result<Self> {
        let connector = Arc::new(SuppaftpConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    /// Provider for the public DATASUS server
    pub fn datasus() -> Result<Self> {
        Self::new(FtpConfig::default())
    }

    /// Create a provider that opens sessions through a custom connector
    pub fn with_connector(config: FtpConfig, connector: Arc<dyn FtpConnector>) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(SessionPool::new(connector, config.pool_size));
        let name = format!("ftp://{}", config.host);
        Ok(Self { config, pool, name })
    }

    /// Endpoint configuration
    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    /// Absolute server path for a provider path.
    ///
    /// Paths already under the base path are kept; anything else, relative
    /// or absolute, is placed under it. The empty path is the base itself.
    pub fn resolve(&self, path: &str) -> String {
        let base = normalize_path(&self.config.base_path);
        let normalized = normalize_path(path);
        if base == "/" || normalized == base || normalized.starts_with(&format!("{base}/")) {
            normalized
        } else if normalized == "/" {
            base
        } else {
            format!("{base}{normalized}")
        }
    }

    /// Open (or reuse) a session and check that the server answers
    pub async fn verify_connection(&self) -> Result<()> {
        self.with_session(|session| Box::pin(async move { session.noop().await }))
            .await?;
        tracing::info!(host = %self.config.host, "FTP connection verified");
        Ok(())
    }

    /// Close all idle sessions
    pub async fn disconnect(&self) {
        self.pool.close().await;
    }

    /// Run one operation on a pooled session.
    ///
    /// A transport failure on a reused session is retried once on a fresh
    /// connection, since idle sessions may have been dropped by the server.
    async fn with_session<T, F>(&self, mut op: F) -> Result<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut Box<dyn FtpSession>) -> BoxFuture<'s, Result<T>> + Send,
    {
        let mut lease = self.pool.acquire().await?;
        let reused = lease.is_reused();
        let result = op(lease.session()?).await;

        match result {
            Err(e) if poisons_session(&e) => {
                lease.discard();
                if !reused {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Stale FTP session, retrying on a fresh connection");
                let mut fresh = self.pool.acquire_fresh().await?;
                let retried = op(fresh.session()?).await;
                if matches!(&retried, Err(e) if poisons_session(e)) {
                    fresh.discard();
                }
                retried
            }
            other => other,
        }
    }

    async fn raw_lines(&self, dir: &str) -> Result<Vec<String>> {
        self.with_session(|session| {
            let dir = dir.to_string();
            Box::pin(async move { session.list(&dir).await })
        })
        .await
    }
}

/// `RETR` into `sink`, retrying once on a fresh session when a reused one
/// fails before any data has been delivered
async fn retrieve_with_reconnect(
    pool: &SessionPool,
    path: &str,
    sink: &mut RetrievalSink,
) -> Result<u64> {
    let mut lease = pool.acquire().await?;
    let reused = lease.is_reused();
    let first = lease.session()?.retrieve(path, sink).await;

    match first {
        Err(e) if poisons_session(&e) => {
            lease.discard();
            if !reused || sink.is_opened() {
                return Err(e);
            }
            tracing::warn!(path, error = %e, "Stale FTP session, retrying retrieval on a fresh connection");
            let mut fresh = pool.acquire_fresh().await?;
            let second = fresh.session()?.retrieve(path, sink).await;
            if matches!(&second, Err(e) if poisons_session(e)) {
                fresh.discard();
            }
            second
        }
        other => other,
    }
}

#[async_trait::async_trait]
impl SourceProvider for FtpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        let dir = self.resolve(path);
        let lines = self.raw_lines(&dir).await?;
        let listing = listing::build_listing(&lines, &dir, &self.name);
        tracing::debug!(
            path = %dir,
            lines = lines.len(),
            files = listing.files.len(),
            subdirectories = listing.subdirectories.len(),
            "Listed FTP directory"
        );
        Ok(listing)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        if self.is_directory(path).await? {
            return Ok(true);
        }
        let (parent, name) = split_path(&self.resolve(path));
        let Some(parent) = parent else {
            return Ok(true);
        };
        match self.raw_lines(&parent).await {
            Ok(lines) => Ok(lines
                .iter()
                .filter_map(|line| listing::parse_line(line))
                .any(|entry| entry.name == name)),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_directory(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path);
        let probe = self
            .with_session(|session| {
                let target = target.clone();
                Box::pin(async move { session.cwd(&target).await })
            })
            .await;
        match probe {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, path: &str) -> Result<ByteStream> {
        let remote = self.resolve(path);
        let (mut sink, opened, chunks) = RetrievalSink::channel(CHUNK_QUEUE);
        let pool = Arc::clone(&self.pool);
        let task_path = remote.clone();

        tokio::spawn(async move {
            let result = retrieve_with_reconnect(&pool, &task_path, &mut sink).await;
            match &result {
                Ok(bytes) => tracing::debug!(path = %task_path, bytes, "FTP retrieval finished"),
                Err(e) => tracing::debug!(path = %task_path, error = %e, "FTP retrieval failed"),
            }
            sink.finish(result).await;
        });

        match opened.await {
            Ok(Ok(())) => Ok(Box::pin(StreamReader::new(ReceiverStream::new(chunks)))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Connection(format!(
                "retrieval of {remote} ended before the transfer opened"
            ))),
        }
    }

    async fn canonical_path(&self, path: &str) -> Result<String> {
        Ok(self.resolve(path))
    }

    fn mirror_path(&self, path: &str) -> String {
        let resolved = self.resolve(path);
        relative_to(&self.config.base_path, &resolved)
            .unwrap_or_else(|| resolved.trim_start_matches('/').to_string())
    }
}
