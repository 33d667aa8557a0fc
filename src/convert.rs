//! Top-level entry points: share link in, PDF out.
//!
//! [`download_book`] runs the whole pipeline. [`inspect`] stops after the
//! manifest is decoded and downloads nothing. Both are thin sequencers over
//! [`crate::pipeline`]; this module owns cleanup of the page directory.

use crate::config::DownloadConfig;
use crate::error::FlipError;
use crate::output::{BookInfo, BookMetadata, BookOutput};
use crate::pipeline::manifest::{self, DeStringDecoder, ManifestDecoder, PAGES_KEY};
use crate::pipeline::{assemble, download, input, metadata, resolve, tasks};
use crate::text::sanitize_filename;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Download a book from its share link and build the PDF.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `url`    — any public share link, with or without scheme
/// * `config` — download configuration
/// * `cancel` — cooperative cancellation; in-flight requests are torn down
///   and the page directory is removed before this returns
///
/// # Errors
/// Every failure is fatal for the run. Single-page failures are retried
/// internally and only surface, as [`FlipError::PagesFailed`], once every
/// page has settled.
pub async fn download_book(
    url: impl AsRef<str>,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<BookOutput, FlipError> {
    let base = resolve::resolve_share_url(url.as_ref())?;
    download_from_base(base, config, cancel).await
}

/// Like [`download_book`], but starting from an already-resolved reader base
/// URL (`.../<publisher>/<book>/`).
pub async fn download_from_base(
    base: Url,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<BookOutput, FlipError> {
    let total_start = Instant::now();
    info!("Starting download: {}", base);
    let client = input::build_client(config)?;

    // ── Step 1: Reader page, configuration, manifest ─────────────────────
    let book = until_cancelled(cancel, load_book(&client, &base, config)).await?;
    let page_count = book.entries.len();
    info!(
        "Book: {} ({} pages)",
        book.metadata.title.as_deref().unwrap_or("-"),
        page_count
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_book_info(
            book.metadata.title.as_deref(),
            book.metadata.description.as_deref(),
            page_count,
        );
    }

    if config.save_config {
        until_cancelled(cancel, save_book_config(&config.out_dir, &book.config)).await?;
    }

    // ── Step 2: Tasks ────────────────────────────────────────────────────
    let tasks = tasks::build_tasks(&base, &book.entries, config.size);

    // ── Step 3: Download ─────────────────────────────────────────────────
    let pages_dir = config.pages_dir();
    let mut guard = PagesDirGuard::new(pages_dir.clone());
    let stats = download::download_all(&client, &tasks, &pages_dir, config, cancel).await?;

    if stats.failed > 0 {
        return Err(FlipError::PagesFailed {
            failed: stats.failed,
            total: tasks.len(),
        });
    }

    // ── Step 4: Assemble ─────────────────────────────────────────────────
    let mut images: Vec<PathBuf> = tasks
        .iter()
        .filter_map(|t| t.out_name.as_deref())
        .map(|name| pages_dir.join(name))
        .collect();
    // Index prefixes are padded to a common width, so this is manifest order.
    images.sort();

    let pdf_path = config.pdf_path.clone().unwrap_or_else(|| {
        config
            .out_dir
            .join(format!("{}.pdf", sanitize_filename(book.metadata.title.as_deref())))
    });
    assemble::assemble_pdf(
        images,
        pdf_path.clone(),
        book.metadata.clone(),
        cancel.clone(),
        config.progress_callback.clone(),
    )
    .await?;

    guard.keep = config.keep_pages;
    let total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!("Done in {}ms: {}", total_duration_ms, pdf_path.display());

    Ok(BookOutput {
        pdf_path,
        metadata: book.metadata,
        stats,
        pages_dir: config.keep_pages.then_some(pages_dir),
        total_duration_ms,
    })
}

/// Synchronous wrapper around [`download_book`].
///
/// Creates a temporary tokio runtime internally. Not cancellable.
pub fn download_book_sync(
    url: impl AsRef<str>,
    config: &DownloadConfig,
) -> Result<BookOutput, FlipError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FlipError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(download_book(url, config, &CancellationToken::new()))
}

/// Resolve the link and decode the manifest without downloading any page.
pub async fn inspect(url: impl AsRef<str>, config: &DownloadConfig) -> Result<BookInfo, FlipError> {
    let base = resolve::resolve_share_url(url.as_ref())?;
    let client = input::build_client(config)?;
    let book = load_book(&client, &base, config).await?;
    Ok(BookInfo {
        base_url: base.to_string(),
        metadata: book.metadata,
        page_count: book.entries.len(),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

struct LoadedBook {
    metadata: BookMetadata,
    config: Map<String, Value>,
    entries: Vec<Value>,
}

async fn load_book(
    client: &Client,
    base: &Url,
    config: &DownloadConfig,
) -> Result<LoadedBook, FlipError> {
    let html = input::fetch_text(client, base, config.timeout_secs).await?;
    let metadata = metadata::extract_metadata(&html);

    let config_url = match metadata::find_config_url(&html, base) {
        Some(url) => url,
        None => {
            debug!("No config script tag; using {}", input::DEFAULT_CONFIG_PATH);
            base.join(input::DEFAULT_CONFIG_PATH)
                .map_err(|e| FlipError::Internal(format!("Bad config URL: {e}")))?
        }
    };
    let book_config = input::fetch_config(client, &config_url, config.timeout_secs).await?;

    let entries = manifest::decode_pages(book_config.get(PAGES_KEY), resolve_decoder(config)).await?;
    if entries.is_empty() {
        return Err(FlipError::ManifestUnavailable {
            detail: "manifest has no pages".into(),
        });
    }

    Ok(LoadedBook {
        metadata,
        config: book_config,
        entries,
    })
}

/// Race `fut` against the token. A decode already running on the blocking
/// pool finishes in the background; its result is dropped.
async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, FlipError>
where
    F: std::future::Future<Output = Result<T, FlipError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Cancelled before download started");
            Err(FlipError::Cancelled)
        }
        result = fut => result,
    }
}

/// Pick the manifest decoder.
///
/// 1. **Pre-built decoder** (`config.decoder`) used as-is; handy in tests.
/// 2. **DeString runtime**, bundle cached under `config.cache_dir` (or the
///    platform cache dir) and fetched on first use.
fn resolve_decoder(config: &DownloadConfig) -> Arc<dyn ManifestDecoder> {
    if let Some(ref decoder) = config.decoder {
        return Arc::clone(decoder);
    }
    Arc::new(DeStringDecoder::new(config.cache_dir.clone()))
}

async fn save_book_config(out_dir: &Path, book_config: &Map<String, Value>) -> Result<(), FlipError> {
    let path = out_dir.join("config.json");
    let write_err = |source: std::io::Error| FlipError::OutputWriteFailed {
        path: path.clone(),
        source,
    };

    let body = serde_json::to_string_pretty(book_config)
        .map_err(|e| FlipError::Internal(format!("Failed to serialise config: {e}")))?;
    tokio::fs::create_dir_all(out_dir).await.map_err(write_err)?;
    tokio::fs::write(&path, body).await.map_err(write_err)?;
    debug!("Saved book configuration to {}", path.display());
    Ok(())
}

/// Removes the page directory on drop unless `keep` is set.
struct PagesDirGuard {
    path: PathBuf,
    keep: bool,
}

impl PagesDirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }
}

impl Drop for PagesDirGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("_pages");
        std::fs::create_dir_all(&pages).unwrap();
        std::fs::write(pages.join("001_a.jpg"), b"x").unwrap();
        drop(PagesDirGuard::new(pages.clone()));
        assert!(!pages.exists());
    }

    #[test]
    fn guard_keeps_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("_pages");
        std::fs::create_dir_all(&pages).unwrap();
        let mut guard = PagesDirGuard::new(pages.clone());
        guard.keep = true;
        drop(guard);
        assert!(pages.exists());
    }

    #[test]
    fn guard_tolerates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        drop(PagesDirGuard::new(dir.path().join("never-created")));
    }

    #[test]
    fn configured_decoder_wins() {
        struct Fixed;
        impl ManifestDecoder for Fixed {
            fn decode(&self, _text: &str) -> Result<String, FlipError> {
                Ok("[\"fixed.jpg\"]".into())
            }
        }
        let decoder: Arc<dyn ManifestDecoder> = Arc::new(Fixed);
        let config = DownloadConfig::builder().decoder(decoder).build().unwrap();
        assert_eq!(resolve_decoder(&config).decode("x").unwrap(), "[\"fixed.jpg\"]");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_pending_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = until_cancelled(&cancel, std::future::pending::<Result<(), FlipError>>())
            .await
            .unwrap_err();
        assert!(matches!(err, FlipError::Cancelled));
    }

    #[tokio::test]
    async fn invalid_link_fails_before_network() {
        let err = download_book("https://fliphtml5.com/onlyone", &DownloadConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlipError::InvalidUrl { .. }));
        assert_eq!(err.exit_code(), 2);
    }
}
