//! FTP control sessions
//!
//! [`FtpSession`] is the set of primitive operations the provider needs from
//! one logged-in control connection, and [`FtpConnector`] opens new ones.
//! The production implementation wraps `suppaftp`'s async client; tests
//! substitute scripted sessions.

use crate::config::FtpConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::io::AsyncReadExt;
use std::io;
use suppaftp::types::{FileType, Response};
use suppaftp::{AsyncFtpStream, FtpError, Mode, Status};
use tokio::sync::{mpsc, oneshot};

/// Size of the reads issued against the data connection
const DATA_CHUNK: usize = 64 * 1024;

/// One logged-in FTP control connection
#[async_trait::async_trait]
pub trait FtpSession: Send {
    /// Raw `LIST` lines for a directory
    async fn list(&mut self, path: &str) -> Result<Vec<String>>;

    /// Change the working directory (used to probe for directories)
    async fn cwd(&mut self, path: &str) -> Result<()>;

    /// `RETR` a file, pushing its contents into `sink`. Returns bytes read.
    async fn retrieve(&mut self, path: &str, sink: &mut RetrievalSink) -> Result<u64>;

    /// `NOOP`, used to check liveness
    async fn noop(&mut self) -> Result<()>;

    /// Close the session politely
    async fn quit(&mut self) -> Result<()>;
}

/// Opens new [`FtpSession`]s
#[async_trait::async_trait]
pub trait FtpConnector: Send + Sync {
    /// Connect and log in
    async fn connect(&self) -> Result<Box<dyn FtpSession>>;
}

/// Producer half of a streamed retrieval.
///
/// The consumer first waits for the "opened" signal, so errors raised before
/// any data flows (missing file, dead connection) reach it as typed errors.
/// After that, data and mid-transfer failures travel through the chunk channel.
pub struct RetrievalSink {
    opened: Option<oneshot::Sender<Result<()>>>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
}

impl RetrievalSink {
    /// Create a sink plus its consumer halves
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        oneshot::Receiver<Result<()>>,
        mpsc::Receiver<io::Result<Bytes>>,
    ) {
        let (opened_tx, opened_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                opened: Some(opened_tx),
                chunks: chunk_tx,
            },
            opened_rx,
            chunk_rx,
        )
    }

    /// Signal that the data connection is open
    pub fn mark_opened(&mut self) {
        if let Some(tx) = self.opened.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Whether [`mark_opened`](Self::mark_opened) has been called
    pub fn is_opened(&self) -> bool {
        self.opened.is_none()
    }

    /// Push one chunk. Returns false once the consumer has gone away.
    pub async fn send(&self, chunk: Bytes) -> bool {
        self.chunks.send(Ok(chunk)).await.is_ok()
    }

    /// Deliver the final result of the retrieval to whichever half is waiting
    pub async fn finish(mut self, result: Result<u64>) {
        match (self.opened.take(), result) {
            (Some(tx), Ok(_)) => {
                let _ = tx.send(Ok(()));
            }
            (Some(tx), Err(e)) => {
                let _ = tx.send(Err(e));
            }
            (None, Ok(_)) => {}
            (None, Err(e)) => {
                let _ = self.chunks.send(Err(into_io_error(e))).await;
            }
        }
    }
}

fn into_io_error(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        Error::Connection(msg) => io::Error::new(io::ErrorKind::ConnectionAborted, msg),
        other => io::Error::other(other.to_string()),
    }
}

/// Map a `suppaftp` error onto the crate taxonomy
pub(crate) fn map_ftp_error(err: FtpError, path: &str) -> Error {
    match err {
        FtpError::ConnectionError(e) => Error::Connection(e.to_string()),
        FtpError::UnexpectedResponse(response) => map_reply(&response, path),
        other => Error::Other(format!("FTP error on {path}: {other}")),
    }
}

/// Classify a negative reply by its status code
fn map_reply(response: &Response, path: &str) -> Error {
    let code = response.status.code();
    let text = response.as_string().unwrap_or_default();
    match response.status {
        Status::FileUnavailable => Error::NotFound(path.to_string()),
        // 421, 425, 426, 450, 451: the server may succeed on a later attempt
        Status::NotAvailable
        | Status::CannotOpenDataConnection
        | Status::TransferAborted
        | Status::RequestFileActionIgnored
        | Status::ActionAborted => Error::Connection(format!("reply {code} for {path}: {text}")),
        _ => Error::Other(format!("FTP reply {code} for {path}: {text}")),
    }
}

/// Connector for real servers via `suppaftp`
#[derive(Clone, Debug)]
pub struct SuppaftpConnector {
    config: FtpConfig,
}

impl SuppaftpConnector {
    /// Create a connector for the given endpoint
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl FtpConnector for SuppaftpConnector {
    async fn connect(&self) -> Result<Box<dyn FtpSession>> {
        let address = self.config.address();
        tracing::debug!(address = %address, "Opening FTP control connection");

        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            AsyncFtpStream::connect(address.as_str()),
        )
        .await
        .map_err(|_| {
            Error::Connection(format!(
                "timed out after {:?} connecting to {address}",
                self.config.connect_timeout
            ))
        })?
        .map_err(|e| map_ftp_error(e, &address))?;

        stream
            .login(self.config.username.as_str(), self.config.password.as_str())
            .await
            .map_err(|e| map_ftp_error(e, &address))?;
        stream.set_mode(Mode::Passive);
        stream
            .transfer_type(FileType::Binary)
            .await
            .map_err(|e| map_ftp_error(e, &address))?;

        tracing::debug!(address = %address, user = %self.config.username, "FTP session ready");
        Ok(Box::new(SuppaftpSession { stream }))
    }
}

/// [`FtpSession`] over a `suppaftp` control connection
pub struct SuppaftpSession {
    stream: AsyncFtpStream,
}

#[async_trait::async_trait]
impl FtpSession for SuppaftpSession {
    async fn list(&mut self, path: &str) -> Result<Vec<String>> {
        self.stream
            .list(Some(path))
            .await
            .map_err(|e| map_ftp_error(e, path))
    }

    async fn cwd(&mut self, path: &str) -> Result<()> {
        self.stream.cwd(path).await.map_err(|e| map_ftp_error(e, path))
    }

    async fn retrieve(&mut self, path: &str, sink: &mut RetrievalSink) -> Result<u64> {
        let mut data = self
            .stream
            .retr_as_stream(path)
            .await
            .map_err(|e| map_ftp_error(e, path))?;
        sink.mark_opened();

        let mut buf = vec![0u8; DATA_CHUNK];
        let mut total = 0u64;
        loop {
            let n = data.read(&mut buf).await.map_err(|e| {
                Error::Connection(format!("data connection failed for {path}: {e}"))
            })?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if !sink.send(Bytes::copy_from_slice(&buf[..n])).await {
                // Consumer is gone; the control connection is left mid-transfer
                return Err(Error::Cancelled);
            }
        }

        self.stream
            .finalize_retr_stream(data)
            .await
            .map_err(|e| map_ftp_error(e, path))?;
        Ok(total)
    }

    async fn noop(&mut self) -> Result<()> {
        self.stream.noop().await.map_err(|e| map_ftp_error(e, "NOOP"))
    }

    async fn quit(&mut self) -> Result<()> {
        self.stream.quit().await.map_err(|e| map_ftp_error(e, "QUIT"))
    }
}
