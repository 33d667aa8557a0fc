//! # fliphtml5-dl
//!
//! Download a FlipHTML5 flipbook from its public share link and save it as a
//! single PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! share link
//!  │
//!  ├─ 1. Resolve   → https://online.fliphtml5.com/<pub>/<book>/
//!  ├─ 2. Fetch     reader page (title, description) + javascript/config.js
//!  ├─ 3. Decode    fliphtml5_pages, via the DeString wasm module if obfuscated
//!  ├─ 4. Tasks     001_<leaf> … with files/<size>/ URLs
//!  ├─ 5. Download  bounded concurrency, retry/backoff, temp file + rename
//!  └─ 6. Assemble  one page per image, Title/Subject metadata (spawn_blocking)
//! ```
//!
//! A page that cannot be fetched after retries does not stop its siblings,
//! but no PDF is built unless every page arrived. The page directory is
//! removed afterwards in every case unless `keep_pages` is set.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fliphtml5_dl::{download_book, CancellationToken, DownloadConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DownloadConfig::builder().out_dir("books").build()?;
//!     let output = download_book(
//!         "https://fliphtml5.com/abcde/fghi/Some-Title/",
//!         &config,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!     println!("PDF: {}", output.pdf_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fliphtml5-dl` binary (clap + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fliphtml5-dl = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod text;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DownloadConfig, DownloadConfigBuilder, SizeTier};
pub use convert::{download_book, download_book_sync, download_from_base, inspect};
pub use error::{FlipError, TaskFailure};
pub use output::{BookInfo, BookMetadata, BookOutput, DownloadStats, DownloadTask, TaskOutcome};
pub use pipeline::manifest::{DeStringDecoder, ManifestDecoder};
pub use pipeline::resolve::resolve_share_url;
pub use progress::{DownloadProgressCallback, NoopProgressCallback, ProgressCallback};
pub use tokio_util::sync::CancellationToken;
