//! Small pool of FTP control sessions
//!
//! Each operation checks out one session exclusively. Checked-in sessions
//! are kept idle for reuse; sessions that failed at the transport level are
//! dropped instead. The pool size bounds how many sessions exist at once and
//! is independent of transfer concurrency.

use super::session::{FtpConnector, FtpSession};
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pool of logged-in sessions
pub struct SessionPool {
    connector: Arc<dyn FtpConnector>,
    idle: Arc<Mutex<Vec<Box<dyn FtpSession>>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl SessionPool {
    /// Create a pool holding at most `size` sessions
    pub fn new(connector: Arc<dyn FtpConnector>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            connector,
            idle: Arc::new(Mutex::new(Vec::with_capacity(size))),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of sessions
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of sessions currently idle
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Check out a session, reusing an idle one when available
    pub async fn acquire(&self) -> Result<PooledSession> {
        let permit = self.permit().await?;
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match reused {
            Some(session) => Ok(PooledSession::new(session, true, permit, &self.idle)),
            None => self.open(permit).await,
        }
    }

    /// Check out a newly connected session, ignoring idle ones
    pub async fn acquire_fresh(&self) -> Result<PooledSession> {
        let permit = self.permit().await?;
        self.open(permit).await
    }

    /// Quit and drop every idle session
    pub async fn close(&self) {
        let drained: Vec<_> = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for mut session in drained {
            if let Err(e) = session.quit().await {
                tracing::debug!(error = %e, "Error closing FTP session");
            }
        }
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("FTP session pool closed".to_string()))
    }

    async fn open(&self, permit: OwnedSemaphorePermit) -> Result<PooledSession> {
        let session = self.connector.connect().await?;
        Ok(PooledSession::new(session, false, permit, &self.idle))
    }
}

/// Whether an error leaves a session in an unknown state
pub(crate) fn poisons_session(err: &Error) -> bool {
    matches!(err, Error::Connection(_) | Error::Io(_) | Error::Cancelled)
}

/// Exclusive lease on one session; returned to the pool on drop
pub struct PooledSession {
    session: Option<Box<dyn FtpSession>>,
    reused: bool,
    idle: Arc<Mutex<Vec<Box<dyn FtpSession>>>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    fn new(
        session: Box<dyn FtpSession>,
        reused: bool,
        permit: OwnedSemaphorePermit,
        idle: &Arc<Mutex<Vec<Box<dyn FtpSession>>>>,
    ) -> Self {
        Self {
            session: Some(session),
            reused,
            idle: Arc::clone(idle),
            _permit: permit,
        }
    }

    /// Whether this session served an earlier operation
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Access the session
    pub fn session(&mut self) -> Result<&mut Box<dyn FtpSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Other("FTP session already discarded".to_string()))
    }

    /// Drop the session instead of returning it to the pool
    pub fn discard(mut self) {
        self.session = None;
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take()
            && let Ok(mut idle) = self.idle.lock()
        {
            idle.push(session);
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ftp::session::RetrievalSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSession;

    #[async_trait::async_trait]
    impl FtpSession for NullSession {
        async fn list(&mut self, _path: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn cwd(&mut self, _path: &str) -> Result<()> {
            Ok(())
        }
        async fn retrieve(&mut self, _path: &str, _sink: &mut RetrievalSink) -> Result<u64> {
            Ok(0)
        }
        async fn noop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn quit(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FtpConnector for CountingConnector {
        async fn connect(&self) -> Result<Box<dyn FtpSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullSession))
        }
    }

    #[tokio::test]
    async fn sessions_are_reused_after_checkin() {
        let connector = Arc::new(CountingConnector::default());
        let pool = SessionPool::new(connector.clone(), 2);

        let first = pool.acquire().await.unwrap();
        assert!(!first.is_reused());
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.acquire().await.unwrap();
        assert!(second.is_reused());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn discarded_sessions_are_not_reused() {
        let connector = Arc::new(CountingConnector::default());
        let pool = SessionPool::new(connector.clone(), 1);

        pool.acquire().await.unwrap().discard();
        assert_eq!(pool.idle_count(), 0);

        let next = pool.acquire().await.unwrap();
        assert!(!next.is_reused());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_size_bounds_checked_out_sessions() {
        let connector = Arc::new(CountingConnector::default());
        let pool = Arc::new(SessionPool::new(connector, 1));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|s| s.is_reused()) })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second checkout must wait for the first");

        drop(held);
        assert!(waiter.await.unwrap().unwrap(), "waiter receives the returned session");
    }

    #[tokio::test]
    async fn close_drains_idle_sessions() {
        let pool = SessionPool::new(Arc::new(CountingConnector::default()), 2);
        drop(pool.acquire().await.unwrap());
        pool.close().await;
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn transport_errors_poison_sessions() {
        assert!(poisons_session(&Error::Connection("reset".into())));
        assert!(poisons_session(&Error::Cancelled));
        assert!(!poisons_session(&Error::NotFound("/x".into())));
    }
}
