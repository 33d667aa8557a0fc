//! # destring-auto
//!
//! Fetch, cache and run the FlipHTML5 `DeString` decoder so that obfuscated
//! page manifests can be read without a JavaScript engine.
//!
//! ## How it works
//!
//! On first call to [`ensure_destring_bundle`] or [`destring`]:
//!
//! 1. Checks `~/.cache/fliphtml5-dl/destring/` for `deString.js`.
//! 2. If absent, downloads it once from [`DESTRING_URL`] and stores it
//!    atomically (temp file + rename).
//! 3. Extracts the WebAssembly module embedded in the bundle as a
//!    `data:application/octet-stream;base64,...` literal.
//! 4. Instantiates it in a sandboxed [`wasmtime`] store with four host
//!    imports (see [`runtime`]) and keeps the instance for the rest of the
//!    process, keyed by bundle path.
//!
//! Subsequent calls skip the network and the compilation entirely.
//!
//! ## Usage
//!
//! ```rust,no_run
//! // Blocking: call from a sync context or inside `spawn_blocking`.
//! let plain = destring_auto::destring("e1Vk...", None).expect("decode failed");
//! println!("{plain}");
//! ```
//!
//! ## Environment variable overrides
//!
//! - `DESTRING_JS_PATH` — path to an existing `deString.js`; skips download.
//! - `DESTRING_CACHE_DIR` — override the default cache directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod runtime;

pub use runtime::DeStringRuntime;

// ── Public constants ─────────────────────────────────────────────────────────

/// Location of the vendor decoder bundle.
pub const DESTRING_URL: &str =
    "https://static.fliphtml5.com/resourceFiles/html5_templates/js/deString.js";

/// File name used for the cached bundle.
pub const BUNDLE_FILE_NAME: &str = "deString.js";

/// WebAssembly linear-memory page size in bytes.
pub const WASM_PAGE_SIZE: u64 = 65_536;

const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by destring-auto operations.
#[derive(Error, Debug)]
pub enum DeStringError {
    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download of the bundle failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// The bundle was read but holds no embedded module.
    #[error("No embedded DeString wasm binary found in '{path}'")]
    PayloadNotFound { path: PathBuf },

    /// The embedded payload is not valid base64.
    #[error("Embedded DeString payload is corrupt: {0}")]
    Payload(String),

    /// The guest module is missing a required export.
    #[error("DeString module does not export '{0}'")]
    MissingExport(&'static str),

    /// Compilation, instantiation or a guest call failed.
    #[error("DeString runtime error: {0}")]
    Runtime(String),

    /// Reading or writing the cached bundle failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the cache directory for the decoder bundle.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/fliphtml5-dl/destring/`
/// - **Linux**: `~/.cache/fliphtml5-dl/destring/`
/// - **Windows**: `%LOCALAPPDATA%\fliphtml5-dl\destring\`
///
/// Override by setting `DESTRING_CACHE_DIR`.
/// The override is used as-is, with no subdirectory appended.
pub fn destring_cache_dir() -> PathBuf {
    cache_dir_with_override(std::env::var_os("DESTRING_CACHE_DIR"))
}

fn cache_dir_with_override(override_dir: Option<std::ffi::OsString>) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("fliphtml5-dl").join("destring")
}

// ── Shared runtime cache ─────────────────────────────────────────────────────

type SharedRuntime = Arc<Mutex<DeStringRuntime>>;

static RUNTIMES: OnceLock<Mutex<HashMap<PathBuf, SharedRuntime>>> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if the bundle is already cached (no network access needed
/// on the next call to [`ensure_destring_bundle`]).
pub fn is_bundle_cached(cache_dir: Option<&Path>) -> bool {
    if let Ok(p) = std::env::var("DESTRING_JS_PATH") {
        return PathBuf::from(p).is_file();
    }
    let dir = cache_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(destring_cache_dir);
    non_empty_file(&dir.join(BUNDLE_FILE_NAME))
}

/// Ensures `deString.js` is present in the local cache and returns its path.
///
/// - If `DESTRING_JS_PATH` is set (and the file exists), that path is used.
/// - Otherwise checks `cache_dir` (or [`destring_cache_dir`]) for a non-empty
///   cached copy.
/// - If absent, downloads [`DESTRING_URL`] once and writes it atomically.
///
/// Blocking; call from `spawn_blocking` when inside an async runtime.
pub fn ensure_destring_bundle(cache_dir: Option<&Path>) -> Result<PathBuf, DeStringError> {
    if let Ok(env_path) = std::env::var("DESTRING_JS_PATH") {
        let p = PathBuf::from(env_path);
        if p.is_file() {
            return Ok(p);
        }
        warn!(
            "DESTRING_JS_PATH '{}' not found; downloading the bundle instead",
            p.display()
        );
    }

    let dir = cache_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(destring_cache_dir);
    let bundle_path = dir.join(BUNDLE_FILE_NAME);

    if non_empty_file(&bundle_path) {
        debug!("Using cached DeString bundle: {}", bundle_path.display());
        return Ok(bundle_path);
    }

    std::fs::create_dir_all(&dir).map_err(DeStringError::CacheDir)?;

    info!("Downloading DeString bundle from {}", DESTRING_URL);
    let bytes = download_bytes(DESTRING_URL)?;
    store_atomically(&bundle_path, &bytes)?;
    info!("Cached DeString bundle at {}", bundle_path.display());

    Ok(bundle_path)
}

/// Pulls the base64 WebAssembly payload out of the bundle source text.
pub fn extract_wasm(bundle_source: &str) -> Option<Result<Vec<u8>, DeStringError>> {
    let re = payload_regex();
    let caps = re.captures(bundle_source)?;
    let encoded = caps.get(1)?.as_str();
    Some(
        STANDARD
            .decode(encoded)
            .map_err(|e| DeStringError::Payload(e.to_string())),
    )
}

/// Reads the bundle at `bundle_path` and returns the embedded module bytes.
pub fn extract_wasm_from_file(bundle_path: &Path) -> Result<Vec<u8>, DeStringError> {
    let raw = std::fs::read(bundle_path).map_err(|source| DeStringError::Io {
        path: bundle_path.to_path_buf(),
        source,
    })?;
    let source = String::from_utf8_lossy(&raw);
    extract_wasm(&source).unwrap_or_else(|| {
        Err(DeStringError::PayloadNotFound {
            path: bundle_path.to_path_buf(),
        })
    })
}

/// Returns the process-wide runtime for `bundle_path`, building it on first use.
///
/// # Thread safety
///
/// Safe to call from multiple threads; each bundle path is compiled and
/// instantiated at most once per process. Callers lock the returned mutex for
/// the duration of one decode.
pub fn shared_runtime(bundle_path: &Path) -> Result<SharedRuntime, DeStringError> {
    let cache = RUNTIMES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| DeStringError::Runtime("runtime cache lock poisoned".into()))?;

    if let Some(rt) = guard.get(bundle_path) {
        return Ok(Arc::clone(rt));
    }

    let wasm = extract_wasm_from_file(bundle_path)?;
    let runtime = DeStringRuntime::new(&wasm)?;
    let shared = Arc::new(Mutex::new(runtime));
    guard.insert(bundle_path.to_path_buf(), Arc::clone(&shared));
    debug!("DeString runtime ready for {}", bundle_path.display());

    Ok(shared)
}

/// Decodes one obfuscated string, fetching and instantiating the decoder on
/// first use.
///
/// Blocking and CPU-bound; call from `spawn_blocking` when inside an async
/// runtime.
pub fn destring(value: &str, cache_dir: Option<&Path>) -> Result<String, DeStringError> {
    let bundle_path = ensure_destring_bundle(cache_dir)?;
    let runtime = shared_runtime(&bundle_path)?;
    let mut runtime = runtime
        .lock()
        .map_err(|_| DeStringError::Runtime("runtime lock poisoned".into()))?;
    runtime.decode(value)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn payload_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"data:application/octet-stream;base64,([A-Za-z0-9+/=]+)")
            .expect("static payload pattern is valid")
    })
}

fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn download_bytes(url: &str) -> Result<Vec<u8>, DeStringError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("destring-auto/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| DeStringError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| DeStringError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(DeStringError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| DeStringError::Download(format!("Read error: {e}")))
}

/// Writes `bytes` next to `dest` and renames it into place, so a concurrent
/// reader never sees a half-written bundle.
fn store_atomically(dest: &Path, bytes: &[u8]) -> Result<(), DeStringError> {
    let tmp = dest.with_extension(format!("js.{}.part", std::process::id()));
    let io_err = |source| DeStringError::Io {
        path: dest.to_path_buf(),
        source,
    };

    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    if let Err(e) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_is_deterministic() {
        let d1 = cache_dir_with_override(None);
        let d2 = cache_dir_with_override(None);
        assert_eq!(d1, d2);
        assert!(d1.ends_with(Path::new("fliphtml5-dl").join("destring")));
    }

    #[test]
    fn cache_dir_override_is_used_verbatim() {
        let dir = cache_dir_with_override(Some("/srv/decoder-cache".into()));
        assert_eq!(dir, PathBuf::from("/srv/decoder-cache"));
        assert_eq!(cache_dir_with_override(Some("".into())), cache_dir_with_override(None));
    }

    #[test]
    fn extracts_payload_between_noise() {
        let payload = STANDARD.encode(b"\0asm\x01\0\0\0");
        let js = format!(
            "var a=1;var wasmBinaryFile=\"data:application/octet-stream;base64,{payload}\";function f(){{}}"
        );
        let bytes = extract_wasm(&js).expect("payload present").unwrap();
        assert_eq!(&bytes[..4], b"\0asm");
    }

    #[test]
    fn missing_payload_is_none() {
        assert!(extract_wasm("var nothing = 'here';").is_none());
    }

    #[test]
    fn extract_from_file_reports_missing_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUNDLE_FILE_NAME);
        std::fs::write(&path, "console.log('no module');").unwrap();
        let err = extract_wasm_from_file(&path).unwrap_err();
        assert!(matches!(err, DeStringError::PayloadNotFound { .. }), "got: {err}");
    }

    #[test]
    fn cached_bundle_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUNDLE_FILE_NAME);
        std::fs::write(&path, "cached").unwrap();
        assert!(is_bundle_cached(Some(dir.path())));
        let resolved = ensure_destring_bundle(Some(dir.path())).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn empty_bundle_is_not_considered_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BUNDLE_FILE_NAME), "").unwrap();
        assert!(!is_bundle_cached(Some(dir.path())));
    }

    #[test]
    fn atomic_store_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(BUNDLE_FILE_NAME);
        store_atomically(&dest, b"payload").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
