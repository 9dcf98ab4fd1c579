//! Common test utilities for datasus-dl integration tests

#![allow(dead_code)]

use datasus_dl::TransferOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Compressed fixture with Huffman-coded literals
pub const RDAC_DBC: &[u8] = include_bytes!("../fixtures/RDAC0801.dbc");

/// Same table compressed with raw literals
pub const RDAC_RAW_DBC: &[u8] = include_bytes!("../fixtures/RDAC0801_raw.dbc");

/// Expected decoded table
pub const RDAC_DBF: &[u8] = include_bytes!("../fixtures/RDAC0801.dbf");

/// Path of a file under `tests/fixtures`
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Options writing into `root` with fast retries
pub fn test_options(root: &Path) -> TransferOptions {
    TransferOptions {
        destination_root: root.to_path_buf(),
        retry_base_delay: Duration::from_millis(5),
        ..TransferOptions::default()
    }
}

/// Files under `root`, relative and `/`-separated, sorted
pub fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}
