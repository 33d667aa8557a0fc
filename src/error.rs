//! Error types for the fliphtml5-dl library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FlipError`] — **Fatal**: the run cannot proceed at all (bad share
//!   URL, reader page unreachable, manifest undecodable, assembly failed).
//!   Returned as `Err(FlipError)` from the top-level entry points.
//!
//! * [`TaskFailure`] — **Non-fatal**: a single page could not be fetched
//!   but its siblings are unaffected. Stored inside
//!   [`crate::output::TaskOutcome`] and aggregated into
//!   [`crate::output::DownloadStats`]; the orchestrator only escalates once
//!   every task has finished.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the fliphtml5-dl library.
///
/// Page-level failures use [`TaskFailure`] and are aggregated rather than
/// propagated here.
#[derive(Debug, Error)]
pub enum FlipError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The share link does not name a publisher and a book.
    #[error("Invalid URL '{url}': path must contain at least two segments: /<publisher>/<book>/...")]
    InvalidUrl { url: String },

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The reader page or configuration could not be fetched.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// A reader page or configuration fetch exceeded the timeout.
    #[error("Fetching '{url}' timed out after {secs}s")]
    FetchTimeout { url: String, secs: u64 },

    /// The configuration body is not the expected JSON object.
    #[error("Failed to parse book configuration from '{url}': {detail}")]
    ConfigParseFailed { url: String, detail: String },

    /// No page list could be enumerated.
    #[error("Page manifest not found or could not be decoded: {detail}")]
    ManifestUnavailable { detail: String },

    // ── Download errors ───────────────────────────────────────────────────
    /// Some pages failed permanently; no document is built.
    #[error("{failed}/{total} pages failed to download; PDF not created")]
    PagesFailed { failed: usize, total: usize },

    /// The download phase was cancelled.
    #[error("Download cancelled")]
    Cancelled,

    // ── Assembly errors ───────────────────────────────────────────────────
    /// The assembler was given no images.
    #[error("No images to build PDF")]
    NoImages,

    /// One image could not be converted into a page.
    #[error("Failed to process image '{file}': {detail}")]
    ImageProcessingFailed { file: String, detail: String },

    /// The assembler observed the cancellation signal.
    #[error("PDF build cancelled")]
    BuildCancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create a directory or write an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlipError {
    /// Process exit code for this error: 130 for user cancellation, 2 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_cancellation() {
            130
        } else {
            2
        }
    }

    /// `true` for the two cancellation outcomes, which trigger cleanup rather
    /// than an error report.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FlipError::Cancelled | FlipError::BuildCancelled)
    }
}

impl From<destring_auto::DeStringError> for FlipError {
    fn from(e: destring_auto::DeStringError) -> Self {
        FlipError::ManifestUnavailable {
            detail: format!("destring failed: {e}"),
        }
    }
}

/// A non-fatal failure for a single page task.
///
/// Displays as the `failed:<reason>` label reported by the download engine.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskFailure {
    /// The manifest entry yielded no usable file name or URL.
    #[error("failed:no_filename")]
    NoFilename,

    /// The output name would resolve outside the destination directory.
    #[error("failed:unsafe_path")]
    UnsafePath,

    /// The server answered with a non-retryable status.
    #[error("failed:{status}")]
    Http { status: u16 },

    /// A connection or body-read error that was not retried.
    #[error("failed:network:{reason}")]
    Network { reason: String },

    /// Local file system error while writing the page.
    #[error("failed:io:{reason}")]
    Io { reason: String },

    /// Transient failures persisted past the attempt ceiling.
    #[error("failed:retries_exhausted({attempts}):{last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The run was cancelled before this task finished.
    #[error("failed:cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_failed_display() {
        let e = FlipError::PagesFailed {
            failed: 1,
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/10"), "got: {msg}");
        assert!(msg.contains("PDF not created"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(FlipError::Cancelled.exit_code(), 130);
        assert_eq!(FlipError::BuildCancelled.exit_code(), 130);
        assert_eq!(FlipError::NoImages.exit_code(), 2);
        assert_eq!(
            FlipError::InvalidUrl {
                url: "x".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(
            FlipError::PagesFailed {
                failed: 1,
                total: 2
            }
            .exit_code(),
            2
        );
    }

    #[test]
    fn image_processing_failed_names_the_file() {
        let e = FlipError::ImageProcessingFailed {
            file: "003_c.jpg".into(),
            detail: "truncated".into(),
        };
        assert!(e.to_string().contains("003_c.jpg"));
        assert!(e.to_string().contains("truncated"));
    }

    #[test]
    fn task_failure_labels() {
        assert_eq!(TaskFailure::UnsafePath.to_string(), "failed:unsafe_path");
        assert_eq!(TaskFailure::NoFilename.to_string(), "failed:no_filename");
        assert_eq!(TaskFailure::Http { status: 404 }.to_string(), "failed:404");
    }

    #[test]
    fn destring_errors_become_manifest_unavailable() {
        let e: FlipError = destring_auto::DeStringError::Download("HTTP 500".into()).into();
        assert!(matches!(e, FlipError::ManifestUnavailable { .. }));
        assert!(e.to_string().contains("HTTP 500"));
    }
}
