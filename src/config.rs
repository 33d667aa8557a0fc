//! Configuration types for a book download.
//!
//! All run behaviour is controlled through [`DownloadConfig`], built via its
//! [`DownloadConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share a config across tasks and to log exactly what a run used.

use crate::error::FlipError;
use crate::pipeline::manifest::ManifestDecoder;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Browser-like user agent; the reader host rejects bare library agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration for one book download.
///
/// Built via [`DownloadConfig::builder()`] or using
/// [`DownloadConfig::default()`].
///
/// # Example
/// ```rust
/// use fliphtml5_dl::{DownloadConfig, SizeTier};
///
/// let config = DownloadConfig::builder()
///     .out_dir("books")
///     .workers(8)
///     .size(SizeTier::Large)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct DownloadConfig {
    /// Directory for `_pages/`, `config.json`, and the derived PDF. Default: `download`.
    pub out_dir: PathBuf,

    /// Number of concurrent page downloads. Default: 6.
    ///
    /// With 1, pages are fetched strictly in manifest order.
    pub workers: usize,

    /// Re-download pages whose output file already exists. Default: false.
    pub overwrite: bool,

    /// Image quality tier requested from the vendor. Default: [`SizeTier::Large`].
    pub size: SizeTier,

    /// Explicit PDF path. If None, `<out_dir>/<sanitized title>.pdf`.
    pub pdf_path: Option<PathBuf>,

    /// Keep `_pages/` after a successful build. Default: false.
    pub keep_pages: bool,

    /// Write the parsed book configuration to `<out_dir>/config.json`. Default: false.
    pub save_config: bool,

    /// Attempts per page, including the first. Default: 4.
    pub max_attempts: u32,

    /// Base backoff in milliseconds; doubles per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Ceiling on any single backoff delay. Default: 30 000.
    pub max_backoff_ms: u64,

    /// Upper bound of the random jitter added to computed backoff. Default: 250.
    pub jitter_ms: u64,

    /// Connect and read timeout for every request, in seconds. Default: 30.
    pub timeout_secs: u64,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Pre-constructed manifest decoder. Takes precedence over the built-in
    /// DeString runtime.
    pub decoder: Option<Arc<dyn ManifestDecoder>>,

    /// Cache directory for the DeString bundle. If None, the platform cache dir.
    pub cache_dir: Option<PathBuf>,

    /// Optional per-task / per-page progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("download"),
            workers: 6,
            overwrite: false,
            size: SizeTier::default(),
            pdf_path: None,
            keep_pages: false,
            save_config: false,
            max_attempts: 4,
            retry_backoff_ms: 500,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            decoder: None,
            cache_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("out_dir", &self.out_dir)
            .field("workers", &self.workers)
            .field("overwrite", &self.overwrite)
            .field("size", &self.size)
            .field("pdf_path", &self.pdf_path)
            .field("keep_pages", &self.keep_pages)
            .field("save_config", &self.save_config)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("decoder", &self.decoder.as_ref().map(|_| "<dyn ManifestDecoder>"))
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl DownloadConfig {
    /// Create a new builder for `DownloadConfig`.
    pub fn builder() -> DownloadConfigBuilder {
        DownloadConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding the downloaded page images.
    pub fn pages_dir(&self) -> PathBuf {
        self.out_dir.join("_pages")
    }
}

/// Builder for [`DownloadConfig`].
pub struct DownloadConfigBuilder {
    config: DownloadConfig,
}

impl fmt::Debug for DownloadConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl DownloadConfigBuilder {
    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = dir.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn size(mut self, tier: SizeTier) -> Self {
        self.config.size = tier;
        self
    }

    pub fn pdf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdf_path = Some(path.into());
        self
    }

    pub fn keep_pages(mut self, v: bool) -> Self {
        self.config.keep_pages = v;
        self
    }

    pub fn save_config(mut self, v: bool) -> Self {
        self.config.save_config = v;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn jitter_ms(mut self, ms: u64) -> Self {
        self.config.jitter_ms = ms;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn ManifestDecoder>) -> Self {
        self.config.decoder = Some(decoder);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DownloadConfig, FlipError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(FlipError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.max_attempts == 0 {
            return Err(FlipError::InvalidConfig("Max attempts must be ≥ 1".into()));
        }
        if c.timeout_secs == 0 {
            return Err(FlipError::InvalidConfig("Timeout must be ≥ 1s".into()));
        }
        if c.retry_backoff_ms > c.max_backoff_ms {
            return Err(FlipError::InvalidConfig(format!(
                "Retry backoff ({}ms) exceeds max backoff ({}ms)",
                c.retry_backoff_ms, c.max_backoff_ms
            )));
        }
        if c.out_dir.as_os_str().is_empty() {
            return Err(FlipError::InvalidConfig("Output directory is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image quality tier served under `files/<tier>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeTier {
    /// Full-resolution page scans. (default)
    #[default]
    Large,
    /// Low-resolution thumbnails.
    Thumb,
}

impl SizeTier {
    /// Path segment used in page URLs.
    pub fn as_path_segment(&self) -> &'static str {
        match self {
            SizeTier::Large => "large",
            SizeTier::Thumb => "thumb",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path_segment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_contract() {
        let c = DownloadConfig::default();
        assert_eq!(c.out_dir, PathBuf::from("download"));
        assert_eq!(c.workers, 6);
        assert!(!c.overwrite);
        assert_eq!(c.size, SizeTier::Large);
        assert!(c.pdf_path.is_none());
        assert_eq!(c.timeout_secs, 30);
        assert_eq!(c.pages_dir(), PathBuf::from("download").join("_pages"));
    }

    #[test]
    fn builder_clamps_workers() {
        let c = DownloadConfig::builder().workers(0).build().unwrap();
        assert_eq!(c.workers, 1);
    }

    #[test]
    fn builder_rejects_inverted_backoff() {
        let err = DownloadConfig::builder()
            .retry_backoff_ms(10_000)
            .max_backoff_ms(100)
            .build()
            .unwrap_err();
        assert!(matches!(err, FlipError::InvalidConfig(_)));
    }

    #[test]
    fn size_tier_segments() {
        assert_eq!(SizeTier::Large.as_path_segment(), "large");
        assert_eq!(SizeTier::Thumb.to_string(), "thumb");
    }
}
