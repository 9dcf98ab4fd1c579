//! Target expansion -- turn download targets into a flat list of files.

use crate::codec;
use crate::directory::Directory;
use crate::error::Error;
use crate::provider::SourceProvider;
use crate::types::{DownloadTarget, FileEntry, Outcome, SkipReason, TargetReport};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A file scheduled for transfer
#[derive(Clone, Debug)]
pub(super) struct PlannedFile {
    /// Listed source file
    pub(super) entry: FileEntry,
    /// Destination relative to the destination root, `.dbc` already renamed
    pub(super) relative: PathBuf,
}

impl PlannedFile {
    /// Plan `entry` at the provider's mirror of its path
    pub(super) fn new(provider: &dyn SourceProvider, entry: FileEntry) -> Self {
        let mut relative: PathBuf = provider
            .mirror_path(&entry.path)
            .split('/')
            .filter(|part| !part.is_empty())
            .collect();
        if codec::is_dbc_name(&entry.name) {
            relative.set_file_name(codec::decoded_name(&entry.name));
        }
        Self { entry, relative }
    }
}

/// Expansion result: files to transfer plus reports for directories that
/// ended without being expanded
#[derive(Debug, Default)]
pub(super) struct Plan {
    pub(super) files: Vec<PlannedFile>,
    pub(super) reports: Vec<TargetReport>,
}

struct PendingDir {
    dir: Directory,
    depth: usize,
}

/// Files scheduled so far, keyed by source path and by destination
#[derive(Default)]
struct Schedule {
    sources: HashSet<String>,
    destinations: HashMap<PathBuf, String>,
}

impl Schedule {
    /// Add `entry` to the plan unless its source is already scheduled.
    /// A second source mapping onto a claimed destination is a failure.
    fn add(&mut self, provider: &dyn SourceProvider, entry: FileEntry, plan: &mut Plan) {
        if !self.sources.insert(entry.path.clone()) {
            tracing::debug!(path = %entry.path, "Skipping duplicate file");
            return;
        }
        let file = PlannedFile::new(provider, entry);
        if let Some(claimed) = self.destinations.get(&file.relative) {
            let e = Error::Other(format!(
                "destination {} is already used by {claimed}",
                file.relative.display()
            ));
            tracing::error!(path = %file.entry.path, error = %e, "Destination collision");
            plan.reports
                .push(TargetReport::untouched(file.entry.path, None, Outcome::failed(&e)));
            return;
        }
        self.destinations
            .insert(file.relative.clone(), file.entry.path.clone());
        plan.files.push(file);
    }
}

/// Expand `targets` in order.
///
/// A directory target is depth 0. Subdirectories deeper than `max_depth`
/// are reported as skipped, as are directories whose canonical path was
/// already visited. A file reached twice is scheduled once; two sources
/// with the same destination are reported as a failure of the later one.
pub(super) async fn expand_targets(
    provider: &Arc<dyn SourceProvider>,
    targets: Vec<DownloadTarget>,
    max_depth: Option<usize>,
    cancel: &CancellationToken,
) -> Plan {
    let mut plan = Plan::default();
    let mut schedule = Schedule::default();
    let mut visited = HashSet::new();

    for target in targets {
        match target {
            DownloadTarget::File(entry) => schedule.add(&**provider, entry, &mut plan),
            DownloadTarget::Directory(path) => {
                let root = PendingDir {
                    dir: Directory::new(Arc::clone(provider), &path),
                    depth: 0,
                };
                expand_directory(root, max_depth, cancel, &mut schedule, &mut visited, &mut plan)
                    .await;
            }
        }
    }

    tracing::debug!(
        files = plan.files.len(),
        directory_reports = plan.reports.len(),
        "Targets expanded"
    );
    plan
}

async fn expand_directory(
    root: PendingDir,
    max_depth: Option<usize>,
    cancel: &CancellationToken,
    schedule: &mut Schedule,
    visited: &mut HashSet<String>,
    plan: &mut Plan,
) {
    let mut stack = vec![root];

    while let Some(PendingDir { dir, depth }) = stack.pop() {
        if cancel.is_cancelled() {
            plan.reports.push(TargetReport::untouched(
                dir.path(),
                None,
                Outcome::skipped(SkipReason::Cancelled),
            ));
            continue;
        }

        let canonical = match dir.provider().canonical_path(dir.path()).await {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::error!(path = %dir.path(), error = %e, "Could not resolve directory");
                plan.reports
                    .push(TargetReport::untouched(dir.path(), None, Outcome::failed(&e)));
                continue;
            }
        };
        if !visited.insert(canonical) {
            if depth == 0 {
                tracing::debug!(path = %dir.path(), "Skipping duplicate directory target");
            } else {
                tracing::warn!(path = %dir.path(), "Directory cycle detected, skipping");
                plan.reports.push(TargetReport::untouched(
                    dir.path(),
                    None,
                    Outcome::skipped(SkipReason::Cycle),
                ));
            }
            continue;
        }

        let listing = match dir.load().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::error!(path = %dir.path(), error = %e, "Could not list directory");
                plan.reports
                    .push(TargetReport::untouched(dir.path(), None, Outcome::failed(&e)));
                continue;
            }
        };

        for entry in &listing.files {
            schedule.add(&**dir.provider(), entry.clone(), plan);
        }

        let child_depth = depth + 1;
        for name in listing.subdirectories.iter().rev() {
            let child = dir.child(name);
            if max_depth.is_some_and(|max| child_depth > max) {
                tracing::debug!(path = %child.path(), depth = child_depth, "Directory beyond depth limit");
                plan.reports.push(TargetReport::untouched(
                    child.path(),
                    None,
                    Outcome::skipped(SkipReason::DepthLimit),
                ));
                continue;
            }
            stack.push(PendingDir {
                dir: child,
                depth: child_depth,
            });
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_helpers::MockProvider;

    fn tree() -> Arc<dyn SourceProvider> {
        let provider = MockProvider::new();
        provider.add_file("/SIASUS/PAAC0801.dbc", b"a");
        provider.add_file("/SIASUS/200801_/PAAC0802.dbc", b"b");
        provider.add_file("/SIASUS/200801_/Dados/PAAC0803.dbc", b"c");
        Arc::new(provider)
    }

    fn relatives(plan: &Plan) -> Vec<String> {
        plan.files
            .iter()
            .map(|f| f.relative.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[tokio::test]
    async fn files_mirror_their_source_paths() {
        let plan = expand_targets(
            &tree(),
            vec![DownloadTarget::Directory("/SIASUS".into())],
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            relatives(&plan),
            [
                "SIASUS/PAAC0801.dbf",
                "SIASUS/200801_/PAAC0802.dbf",
                "SIASUS/200801_/Dados/PAAC0803.dbf"
            ]
        );
        assert!(plan.reports.is_empty());
    }

    #[tokio::test]
    async fn depth_limit_reports_skipped_subdirectories() {
        let plan = expand_targets(
            &tree(),
            vec![DownloadTarget::Directory("/SIASUS".into())],
            Some(1),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(relatives(&plan), ["SIASUS/PAAC0801.dbf", "SIASUS/200801_/PAAC0802.dbf"]);
        assert_eq!(plan.reports.len(), 1);
        assert_eq!(plan.reports[0].source, "/SIASUS/200801_/Dados");
        assert_eq!(
            plan.reports[0].outcome,
            Outcome::skipped(SkipReason::DepthLimit)
        );
    }

    #[tokio::test]
    async fn depth_zero_expands_only_the_target() {
        let plan = expand_targets(
            &tree(),
            vec![DownloadTarget::Directory("/SIASUS".into())],
            Some(0),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(relatives(&plan), ["SIASUS/PAAC0801.dbf"]);
        assert_eq!(plan.reports[0].source, "/SIASUS/200801_");
    }

    #[tokio::test]
    async fn cycles_are_reported_once() {
        let provider = MockProvider::new();
        provider.add_file("/SIASUS/PAAC0801.dbc", b"a");
        provider.add_dir("/SIASUS/atalho");
        provider.alias("/SIASUS/atalho", "/SIASUS");
        let provider: Arc<dyn SourceProvider> = Arc::new(provider);

        let plan = expand_targets(
            &provider,
            vec![DownloadTarget::Directory("/SIASUS".into())],
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(relatives(&plan), ["SIASUS/PAAC0801.dbf"]);
        assert_eq!(plan.reports.len(), 1);
        assert_eq!(plan.reports[0].outcome, Outcome::skipped(SkipReason::Cycle));
    }

    #[tokio::test]
    async fn repeated_files_are_scheduled_once() {
        let provider = tree();
        let entry = FileEntry::new("/SIASUS/PAAC0801.dbc", "PAAC0801.dbc", "mock");
        let plan = expand_targets(
            &provider,
            vec![
                DownloadTarget::File(entry.clone()),
                DownloadTarget::File(entry),
                DownloadTarget::Directory("/SIASUS".into()),
                DownloadTarget::Directory("/SIASUS/".into()),
            ],
            Some(0),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(relatives(&plan), ["SIASUS/PAAC0801.dbf"]);
        // The repeated directory target is silently dropped, the depth skip is kept
        assert_eq!(plan.reports.len(), 1);
    }

    #[tokio::test]
    async fn unlistable_directories_are_failures() {
        let provider = MockProvider::new();
        provider.add_file("/SIASUS/PAAC0801.dbc", b"a");
        provider.add_dir("/SIASUS/quebrado");
        provider.fail_list("/SIASUS/quebrado", || Error::Connection("reset".into()));
        let provider: Arc<dyn SourceProvider> = Arc::new(provider);

        let plan = expand_targets(
            &provider,
            vec![
                DownloadTarget::Directory("/SIASUS".into()),
                DownloadTarget::Directory("/SIHSUS".into()),
            ],
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(relatives(&plan), ["SIASUS/PAAC0801.dbf"]);
        let failed: Vec<_> = plan.reports.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(failed, ["/SIASUS/quebrado", "/SIHSUS"]);
        assert!(plan.reports.iter().all(|r| r.outcome.is_failure()));
    }

    #[tokio::test]
    async fn cancelled_expansion_skips_directories() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let plan = expand_targets(
            &tree(),
            vec![DownloadTarget::Directory("/SIASUS".into())],
            None,
            &cancel,
        )
        .await;

        assert!(plan.files.is_empty());
        assert_eq!(
            plan.reports[0].outcome,
            Outcome::skipped(SkipReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn same_named_files_keep_their_source_directories() {
        let provider = MockProvider::new();
        provider.add_file("/SIASUS/A/X.txt", b"a");
        provider.add_file("/SIHSUS/B/X.txt", b"b");
        provider.add_file("/SIASUS/200801_/Dados/Y.txt", b"c");
        provider.add_file("/SIHSUS/200801_/Dados/Y.txt", b"d");
        let provider: Arc<dyn SourceProvider> = Arc::new(provider);
        let file = |path: &str| {
            DownloadTarget::File(FileEntry::new(path, crate::provider::file_name(path), "mock"))
        };

        let plan = expand_targets(
            &provider,
            vec![
                file("/SIASUS/A/X.txt"),
                file("/SIHSUS/B/X.txt"),
                DownloadTarget::Directory("/SIASUS/200801_/Dados".into()),
                DownloadTarget::Directory("/SIHSUS/200801_/Dados".into()),
            ],
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            relatives(&plan),
            [
                "SIASUS/A/X.txt",
                "SIHSUS/B/X.txt",
                "SIASUS/200801_/Dados/Y.txt",
                "SIHSUS/200801_/Dados/Y.txt"
            ]
        );
        assert!(plan.reports.is_empty());
    }

    #[tokio::test]
    async fn colliding_destinations_fail_the_later_source() {
        let provider = MockProvider::new();
        provider.add_file("/SIASUS/RDAC0801.dbc", b"compactado");
        provider.add_file("/SIASUS/RDAC0801.dbf", b"descompactado");
        let provider: Arc<dyn SourceProvider> = Arc::new(provider);

        let plan = expand_targets(
            &provider,
            vec![DownloadTarget::Directory("/SIASUS".into())],
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(relatives(&plan), ["SIASUS/RDAC0801.dbf"]);
        assert_eq!(plan.files[0].entry.path, "/SIASUS/RDAC0801.dbc");
        assert_eq!(plan.reports.len(), 1);
        assert_eq!(plan.reports[0].source, "/SIASUS/RDAC0801.dbf");
        assert!(plan.reports[0].outcome.is_failure());
    }
}
