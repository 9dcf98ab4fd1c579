//! Configuration types for datasus-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Default DATASUS FTP host
pub const DATASUS_HOST: &str = "ftp.datasus.gov.br";

/// Directory under which DATASUS publishes its public files
pub const DATASUS_BASE_PATH: &str = "/dissemin/publicos";

/// Options governing one download run
///
/// Immutable for the duration of a run. Every field has a serde default, so
/// an empty JSON object deserializes to [`TransferOptions::default`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Replace files that already exist at the destination (default: false)
    #[serde(default)]
    pub overwrite: bool,

    /// Maximum number of transfers in flight (default: 4, must be >= 1)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Progress rendering mode (default: off)
    #[serde(default)]
    pub progress_mode: ProgressMode,

    /// Root directory that receives downloaded files (default: "./downloads")
    #[serde(default = "default_destination_root")]
    pub destination_root: PathBuf,

    /// Retries after the first attempt for transient failures (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry, doubled for every further retry (default: 1 second)
    #[serde(default = "default_retry_base_delay", with = "duration_ms_serde")]
    pub retry_base_delay: Duration,

    /// Maximum directory depth to descend into (None = unbounded)
    #[serde(default)]
    pub max_recursion_depth: Option<usize>,

    /// Chunk size used when streaming from a provider (default: 64 KiB, must be >= 1)
    #[serde(default = "default_transfer_buffer_bytes")]
    pub transfer_buffer_bytes: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            concurrency: default_concurrency(),
            progress_mode: ProgressMode::default(),
            destination_root: default_destination_root(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            max_recursion_depth: None,
            transfer_buffer_bytes: default_transfer_buffer_bytes(),
        }
    }
}

impl TransferOptions {
    /// Check the invariants that cannot be expressed in the type
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency", "concurrency must be at least 1"));
        }
        if self.transfer_buffer_bytes == 0 {
            return Err(Error::config(
                "transfer_buffer_bytes",
                "transfer buffer must be at least 1 byte",
            ));
        }
        if self.destination_root.as_os_str().is_empty() {
            return Err(Error::config(
                "destination_root",
                "destination root must not be empty",
            ));
        }
        Ok(())
    }
}

/// How progress is rendered while a run is active
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// No progress output
    #[default]
    Off,
    /// One aggregate byte counter for the whole run
    Single,
    /// One bar per in-flight file plus the aggregate bar
    Multi,
}

/// FTP endpoint configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpConfig {
    /// Server hostname (default: "ftp.datasus.gov.br")
    #[serde(default = "default_ftp_host")]
    pub host: String,

    /// Control connection port (default: 21)
    #[serde(default = "default_ftp_port")]
    pub port: u16,

    /// Remote directory that relative paths are resolved under (default: "/dissemin/publicos")
    #[serde(default = "default_ftp_base_path")]
    pub base_path: String,

    /// Login user (default: "anonymous")
    #[serde(default = "default_ftp_username")]
    pub username: String,

    /// Login password (default: "anonymous@")
    #[serde(default = "default_ftp_password")]
    pub password: String,

    /// Maximum number of control sessions kept open (default: 2)
    #[serde(default = "default_ftp_pool_size")]
    pub pool_size: usize,

    /// Timeout for establishing a control connection (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: default_ftp_host(),
            port: default_ftp_port(),
            base_path: default_ftp_base_path(),
            username: default_ftp_username(),
            password: default_ftp_password(),
            pool_size: default_ftp_pool_size(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl FtpConfig {
    /// Anonymous access to an arbitrary host, with no base path
    pub fn anonymous(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            base_path: "/".to_string(),
            ..Self::default()
        }
    }

    /// `host:port` string used to open the control connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the invariants that cannot be expressed in the type
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host", "FTP host must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(Error::config("pool_size", "pool size must be at least 1"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config(
                "connect_timeout",
                "connect timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Options for the DBC decoder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Compare the CRC32 trailer against the decompressed payload and warn on mismatch
    #[serde(default)]
    pub verify_crc: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_destination_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_transfer_buffer_bytes() -> usize {
    64 * 1024
}

fn default_ftp_host() -> String {
    DATASUS_HOST.to_string()
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_base_path() -> String {
    DATASUS_BASE_PATH.to_string()
}

fn default_ftp_username() -> String {
    "anonymous".to_string()
}

fn default_ftp_password() -> String {
    "anonymous@".to_string()
}

fn default_ftp_pool_size() -> usize {
    2
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (milliseconds)
pub(crate) mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
