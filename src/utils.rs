//! Utility functions for staging files and formatting log output

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

/// Hidden staging path next to `destination`
///
/// The name starts with a dot, carries the process id plus a per-process
/// counter, and ends in `tag`, e.g. `.RDAC0801.dbf.4242-7.part`. Two calls
/// never return the same path within one process.
///
/// # Examples
///
/// ```
/// use datasus_dl::utils::temp_path;
/// use std::path::Path;
///
/// let tmp = temp_path(Path::new("/data/SIASUS/PAAC0801.dbf"), "part").unwrap();
/// assert_eq!(tmp.parent(), Some(Path::new("/data/SIASUS")));
/// assert!(tmp.file_name().unwrap().to_str().unwrap().starts_with(".PAAC0801.dbf."));
/// ```
pub fn temp_path(destination: &Path, tag: &str) -> Result<PathBuf> {
    let name = destination
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other(format!("invalid destination path {}", destination.display())))?;
    let id = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
    Ok(destination.with_file_name(format!(".{name}.{}-{id}.{tag}", std::process::id())))
}

/// Remove a file, treating an already missing file as success
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Move a staged file onto its final path, replacing any existing file
pub async fn commit(staged: &Path, destination: &Path) -> std::io::Result<()> {
    tokio::fs::rename(staged, destination).await
}

/// Human-readable size with binary units, e.g. `1.5 MiB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
