//! Value types produced by the pipeline stages.

use crate::error::TaskFailure;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Human-readable book details scraped from the reader page.
///
/// Either field may be absent; both are attached to the PDF once, at the
/// document level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// One page to fetch.
///
/// `url` and `out_name` are both `None` for manifest entries that yield no
/// usable file name; such tasks fail without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// 0-based position in the manifest.
    pub index: usize,
    /// Absolute image URL.
    pub url: Option<String>,
    /// Local file name, `NNN_<leaf>` with a 1-based zero-padded prefix.
    pub out_name: Option<String>,
}

impl DownloadTask {
    /// Label used for progress display.
    pub fn label(&self) -> String {
        match &self.out_name {
            Some(name) => name.clone(),
            None => format!("page {}", self.index + 1),
        }
    }
}

/// Final state of one download task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Fetched and renamed into place.
    Ok,
    /// Output already existed and overwrite was off.
    Skipped,
    /// Permanent failure; siblings are unaffected.
    Failed(TaskFailure),
}

impl TaskOutcome {
    /// Short status label: `ok`, `skip`, or `failed:<reason>`.
    pub fn label(&self) -> String {
        match self {
            TaskOutcome::Ok => "ok".to_string(),
            TaskOutcome::Skipped => "skip".to_string(),
            TaskOutcome::Failed(f) => f.to_string(),
        }
    }
}

/// Aggregate result of the download phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadStats {
    /// Fold one task outcome into the counters.
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Ok => self.ok += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Number of tasks accounted for so far.
    pub fn total(&self) -> usize {
        self.ok + self.skipped + self.failed
    }
}

/// What [`crate::convert::inspect`] learns without downloading pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookInfo {
    /// Reader base URL, `https://online.fliphtml5.com/<publisher>/<book>/`.
    pub base_url: String,
    pub metadata: BookMetadata,
    /// Number of manifest entries.
    pub page_count: usize,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookOutput {
    /// Path of the assembled PDF.
    pub pdf_path: PathBuf,
    pub metadata: BookMetadata,
    pub stats: DownloadStats,
    /// Page image directory, present only when pages were kept.
    pub pages_dir: Option<PathBuf>,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_outcomes() {
        let mut stats = DownloadStats::default();
        stats.record(&TaskOutcome::Ok);
        stats.record(&TaskOutcome::Skipped);
        stats.record(&TaskOutcome::Failed(TaskFailure::UnsafePath));
        stats.record(&TaskOutcome::Ok);
        assert_eq!(
            stats,
            DownloadStats {
                ok: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(stats.total(), 4);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(TaskOutcome::Ok.label(), "ok");
        assert_eq!(TaskOutcome::Skipped.label(), "skip");
        assert_eq!(
            TaskOutcome::Failed(TaskFailure::Http { status: 503 }).label(),
            "failed:503"
        );
    }

    #[test]
    fn task_label_falls_back_to_page_number() {
        let t = DownloadTask {
            index: 4,
            url: None,
            out_name: None,
        };
        assert_eq!(t.label(), "page 5");
    }
}
