//! Progress bars for a download run.

use crate::config::ProgressMode;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const TOTAL_TEMPLATE: &str =
    "{prefix:>8} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const FILE_TEMPLATE: &str = "{prefix:>20} {bar:30} {bytes}/{total_bytes}";
const SPINNER_TEMPLATE: &str = "{prefix:>20} {spinner} {bytes}";

/// Progress display shared by all transfers of a run
pub(crate) struct TransferProgress {
    mode: ProgressMode,
    multi: Option<MultiProgress>,
    total: Option<ProgressBar>,
}

impl TransferProgress {
    /// Progress drawn to stderr
    pub(crate) fn new(mode: ProgressMode, total_bytes: Option<u64>, files: usize) -> Self {
        Self::with_draw_target(mode, total_bytes, files, ProgressDrawTarget::stderr())
    }

    /// Progress that tracks positions without drawing anything
    #[cfg(test)]
    pub(crate) fn hidden(mode: ProgressMode, total_bytes: Option<u64>, files: usize) -> Self {
        Self::with_draw_target(mode, total_bytes, files, ProgressDrawTarget::hidden())
    }

    fn with_draw_target(
        mode: ProgressMode,
        total_bytes: Option<u64>,
        files: usize,
        target: ProgressDrawTarget,
    ) -> Self {
        if mode == ProgressMode::Off {
            return Self {
                mode,
                multi: None,
                total: None,
            };
        }

        let multi = MultiProgress::with_draw_target(target);
        let total = multi.add(match total_bytes {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        });
        total.set_style(
            ProgressStyle::with_template(TOTAL_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        total.set_prefix(format!("{files} files"));

        Self {
            mode,
            multi: Some(multi),
            total: Some(total),
        }
    }

    /// Begin tracking one file
    pub(crate) fn start_file(&self, name: &str, size: Option<u64>) -> FileProgress {
        let bar = match (&self.multi, self.mode) {
            (Some(multi), ProgressMode::Multi) => {
                let (bar, template) = match size {
                    Some(len) => (ProgressBar::new(len), FILE_TEMPLATE),
                    None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
                };
                let bar = multi.add(bar);
                bar.set_style(
                    ProgressStyle::with_template(template)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                bar.set_prefix(name.to_string());
                Some(bar)
            }
            _ => None,
        };
        FileProgress {
            bar,
            total: self.total.clone(),
            multi: self.multi.clone(),
        }
    }

    /// Drop a file that will not be transferred from the aggregate length
    pub(crate) fn skip_file(&self, size: Option<u64>) {
        if let (Some(total), Some(size)) = (&self.total, size) {
            total.dec_length(size);
        }
    }

    /// Bytes counted by the aggregate bar so far
    #[cfg(test)]
    pub(crate) fn position(&self) -> u64 {
        self.total.as_ref().map_or(0, ProgressBar::position)
    }

    /// Length of the aggregate bar, if known
    #[cfg(test)]
    pub(crate) fn length(&self) -> Option<u64> {
        self.total.as_ref().and_then(ProgressBar::length)
    }

    /// Stop drawing and clear the bars
    pub(crate) fn finish(&self) {
        if let Some(total) = &self.total {
            total.finish_and_clear();
        }
        if let Some(multi) = &self.multi {
            let _ = multi.clear();
        }
    }
}

/// Progress handle for one in-flight file
pub(crate) struct FileProgress {
    bar: Option<ProgressBar>,
    total: Option<ProgressBar>,
    multi: Option<MultiProgress>,
}

impl FileProgress {
    /// Count `bytes` read from the source
    pub(crate) fn advance(&self, bytes: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(bytes);
        }
        if let Some(total) = &self.total {
            total.inc(bytes);
        }
    }

    /// Discount bytes of an attempt that is about to be retried
    pub(crate) fn rewind(&self, bytes: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(0);
        }
        if let Some(total) = &self.total {
            total.dec(bytes);
        }
    }

    /// Remove this file's bar
    pub(crate) fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
            if let Some(multi) = &self.multi {
                multi.remove(&bar);
            }
        }
    }
}
