//! Progress-callback trait for download and assembly events.
//!
//! Inject an [`Arc<dyn DownloadProgressCallback>`] via
//! [`crate::config::DownloadConfigBuilder::progress_callback`] to receive
//! events as the pipeline runs. The library never draws anything itself; the
//! CLI forwards these events to an `indicatif` bar.
//!
//! Events are observational only. Nothing a callback does changes which
//! pages are fetched or how the PDF is built.
//!
//! # Example
//!
//! ```rust
//! use fliphtml5_dl::{DownloadConfig, DownloadProgressCallback, DownloadStats, TaskOutcome};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl DownloadProgressCallback for CountingCallback {
//!     fn on_task_complete(&self, label: &str, outcome: &TaskOutcome, counts: &DownloadStats) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{label}: {} ({} ok so far)", outcome.label(), counts.ok);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//! let config = DownloadConfig::builder()
//!     .progress_callback(cb as Arc<dyn DownloadProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{DownloadStats, TaskOutcome};
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as it resolves, downloads, and assembles a book.
///
/// Implementations must be `Send + Sync`: with more than one worker,
/// `on_task_complete` may be called from different tasks, and the assembly
/// events fire on a blocking worker thread. All methods default to no-ops.
pub trait DownloadProgressCallback: Send + Sync {
    /// Called once the manifest is decoded.
    fn on_book_info(&self, title: Option<&str>, description: Option<&str>, pages: usize) {
        let _ = (title, description, pages);
    }

    /// Called before the first page request.
    fn on_download_start(&self, total_tasks: usize) {
        let _ = total_tasks;
    }

    /// Called after each task reaches its final state.
    ///
    /// # Arguments
    /// * `label`   — the task's output name (or `page N` when it has none)
    /// * `outcome` — ok / skipped / failed
    /// * `counts`  — running totals including this task
    fn on_task_complete(&self, label: &str, outcome: &TaskOutcome, counts: &DownloadStats) {
        let _ = (label, outcome, counts);
    }

    /// Called once every task has finished (not on cancellation).
    fn on_download_complete(&self, stats: &DownloadStats) {
        let _ = stats;
    }

    /// Called before the first page is embedded in the PDF.
    fn on_assembly_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each image is embedded.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in the document
    /// * `label`       — image file name
    fn on_page_embedded(&self, page_num: usize, total_pages: usize, label: &str) {
        let _ = (page_num, total_pages, label);
    }

    /// Called after the PDF is in place at `path`.
    fn on_assembly_complete(&self, path: &Path) {
        let _ = path;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DownloadProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DownloadConfig`].
pub type ProgressCallback = Arc<dyn DownloadProgressCallback>;
