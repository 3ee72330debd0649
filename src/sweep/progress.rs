//! Per-batch progress reporting.
//!
//! Every processed item emits a `debug` line with index, percentage and a
//! textual bar. When progress display is enabled each batch also gets an
//! `indicatif` bar on stderr.

use crate::sweep::grouper::BatchId;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::debug;

const BAR_WIDTH: usize = 20;

#[derive(Clone, Default)]
pub struct ProgressHub {
    multi: Option<MultiProgress>,
}

impl ProgressHub {
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: enabled.then(MultiProgress::new),
        }
    }

    pub fn batch(&self, id: &BatchId, total: usize) -> BatchProgress {
        let bar = match &self.multi {
            Some(multi) => {
                let bar = multi.add(ProgressBar::new(total as u64));
                bar.set_style(
                    ProgressStyle::with_template(
                        "{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} ({percent}%) {wide_msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                bar.set_prefix(id.to_string());
                bar
            }
            None => ProgressBar::hidden(),
        };
        BatchProgress {
            bar,
            label: id.to_string(),
            total,
        }
    }
}

pub struct BatchProgress {
    bar: ProgressBar,
    label: String,
    total: usize,
}

impl BatchProgress {
    pub fn hidden(label: impl Into<String>, total: usize) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            label: label.into(),
            total,
        }
    }

    /// Record that the item at `index` (0-based within the batch) is done.
    pub fn advance(&self, index: usize, path: &Path) {
        let done = index + 1;
        debug!(
            batch = %self.label,
            index,
            total = self.total,
            percent = %format!("{:.1}", percent(done, self.total)),
            bar = %render_bar(done, self.total, BAR_WIDTH),
            "{}",
            path.display()
        );
        self.bar.set_message(path.display().to_string());
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    done as f64 * 100.0 / total as f64
}

fn render_bar(done: usize, total: usize, width: usize) -> String {
    let filled = if total == 0 {
        width
    } else {
        (done.min(total) * width) / total
    };
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
