//! FTP `LIST` output parsing
//!
//! Two line formats are recognised:
//! - Unix `ls -l`: `-rw-r--r--   1 owner group   1234 Jan 15  2008 NAME`
//! - MS-DOS/IIS (used by DATASUS): `01-15-08  10:30AM       1234 NAME` or
//!   `01-15-08  10:30AM  <DIR>  NAME`
//!
//! Lines matching neither format are skipped.

use crate::provider::join_path;
use crate::types::{DirectoryListing, FileEntry};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn unix_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([\-dlbcps])\S{9}\S?\s+\d+\s+\S+\s+(?:\S+\s+)?(\d+)\s+([A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s+(.+)$",
        )
        .expect("compile unix listing pattern")
    })
}

#[allow(clippy::expect_used)]
fn dos_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{2}-\d{2}-\d{2,4})\s+(\d{1,2}:\d{2}\s*[AaPp][Mm])\s+(<DIR>|\d+)\s+(.+)$")
            .expect("compile dos listing pattern")
    })
}

/// Kind of a parsed listing line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with its size
    File(u64),
    /// Directory
    Directory,
    /// Symbolic link (size of the link itself is meaningless)
    Link,
}

/// One parsed listing line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Entry name
    pub name: String,
    /// What the entry is
    pub kind: EntryKind,
    /// Modification time, when the date could be parsed
    pub modified: Option<DateTime<Utc>>,
}

/// Parse one `LIST` line in either supported format
pub fn parse_line(line: &str) -> Option<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    parse_dos_line(line).or_else(|| parse_unix_line(line))
}

fn parse_dos_line(line: &str) -> Option<ListEntry> {
    let caps = dos_line().captures(line.trim())?;
    let name = caps[4].trim().to_string();

    let kind = match &caps[3] {
        "<DIR>" => EntryKind::Directory,
        size => EntryKind::File(size.parse().ok()?),
    };

    let time: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
    let stamp = format!("{} {}", &caps[1], time.to_ascii_uppercase());
    let modified = ["%m-%d-%y %I:%M%p", "%m-%d-%Y %I:%M%p"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&stamp, fmt).ok())
        .map(|naive| naive.and_utc());

    Some(ListEntry {
        name,
        kind,
        modified,
    })
}

fn parse_unix_line(line: &str) -> Option<ListEntry> {
    let caps = unix_line().captures(line)?;

    let raw_name = caps[4].trim();
    let (kind, name) = match &caps[1] {
        "d" => (EntryKind::Directory, raw_name),
        "l" => (
            EntryKind::Link,
            raw_name.split_once(" -> ").map_or(raw_name, |(name, _)| name),
        ),
        _ => (EntryKind::File(caps[2].parse().ok()?), raw_name),
    };

    Some(ListEntry {
        name: name.to_string(),
        kind,
        modified: parse_unix_date(&caps[3], Utc::now()),
    })
}

/// Parse `Mon DD YYYY` or `Mon DD HH:MM`. The year-less form refers to the
/// most recent such date not in the future.
fn parse_unix_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let [month, day, year_or_time] = parts.as_slice() else {
        return None;
    };

    if let Some((hour, minute)) = year_or_time.split_once(':') {
        let time = NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)?;
        let dated = |year: i32| {
            NaiveDate::parse_from_str(&format!("{month} {day} {year}"), "%b %d %Y")
                .ok()
                .map(|date| date.and_time(time).and_utc())
        };
        match dated(now.year()) {
            Some(stamp) if stamp <= now => Some(stamp),
            _ => dated(now.year() - 1),
        }
    } else {
        NaiveDate::parse_from_str(&format!("{month} {day} {year_or_time}"), "%b %d %Y")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

/// Build a [`DirectoryListing`] from raw `LIST` lines of `dir_path`.
///
/// `.` and `..` are dropped, unparsable lines are skipped, and a `.dbf`
/// file is hidden when a `.dbc` file with the same stem is present.
pub fn build_listing<S: AsRef<str>>(lines: &[S], dir_path: &str, provider: &str) -> DirectoryListing {
    let mut listing = DirectoryListing::default();

    for line in lines {
        let line = line.as_ref();
        if line.trim().is_empty() || line.starts_with("total ") {
            continue;
        }
        let Some(entry) = parse_line(line) else {
            tracing::debug!(line, dir = dir_path, "Skipping unparsable listing line");
            continue;
        };
        if entry.name == "." || entry.name == ".." {
            continue;
        }

        match entry.kind {
            EntryKind::Directory => listing.subdirectories.push(entry.name),
            EntryKind::File(size) => {
                let mut file = FileEntry::new(join_path(dir_path, &entry.name), entry.name, provider)
                    .with_size(size);
                file.modified = entry.modified;
                listing.files.push(file);
            }
            EntryKind::Link => {
                let mut file = FileEntry::new(join_path(dir_path, &entry.name), entry.name, provider);
                file.modified = entry.modified;
                listing.files.push(file);
            }
        }
    }

    suppress_shadowed_dbf(&mut listing.files);
    listing.files.sort_by(|a, b| a.name.cmp(&b.name));
    listing.subdirectories.sort();
    listing
}

/// Drop `X.DBF` entries when `X.DBC` is also listed
fn suppress_shadowed_dbf(files: &mut Vec<FileEntry>) {
    let compressed: HashSet<String> = files
        .iter()
        .filter(|f| f.has_extension("dbc"))
        .map(|f| stem_upper(&f.name))
        .collect();
    if compressed.is_empty() {
        return;
    }
    files.retain(|f| !(f.has_extension("dbf") && compressed.contains(&stem_upper(&f.name))));
}

fn stem_upper(name: &str) -> String {
    name.rsplit_once('.')
        .map_or(name, |(stem, _)| stem)
        .to_ascii_uppercase()
}
