//! Page-manifest decoding.
//!
//! The book configuration carries its page list under `fliphtml5_pages` in
//! one of three shapes:
//!
//! 1. a JSON array — used as-is;
//! 2. a string that already holds JSON (`[...]` / `{...}`), possibly with
//!    junk around it — the text between the first `[` and last `]` is parsed;
//! 3. an opaque obfuscated string — reversed by a [`ManifestDecoder`]
//!    (normally the vendor's DeString WebAssembly module), then parsed as in 2.
//!
//! Decoding never reorders entries. Running the decoder is CPU-bound and
//! synchronous, so [`decode_pages`] moves it onto `spawn_blocking`.

use crate::error::FlipError;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration key holding the page list.
pub const PAGES_KEY: &str = "fliphtml5_pages";

/// Reverses the vendor's string obfuscation.
///
/// Implementations must be cheap to call repeatedly; expensive setup belongs
/// in construction or behind a lazily initialised cache.
pub trait ManifestDecoder: Send + Sync {
    /// Turn obfuscated text into plain text. Blocking.
    fn decode(&self, text: &str) -> Result<String, FlipError>;
}

/// The built-in decoder backed by the vendor's DeString WebAssembly module.
///
/// The bundle is fetched once into `cache_dir` and the instantiated runtime
/// is shared process-wide (see [`destring_auto::shared_runtime`]).
#[derive(Debug, Clone, Default)]
pub struct DeStringDecoder {
    cache_dir: Option<PathBuf>,
}

impl DeStringDecoder {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self { cache_dir }
    }
}

impl ManifestDecoder for DeStringDecoder {
    fn decode(&self, text: &str) -> Result<String, FlipError> {
        Ok(destring_auto::destring(text, self.cache_dir.as_deref())?)
    }
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEntry {
    /// A bare file name or relative path.
    PlainName(String),
    /// A record such as `{"n": ["a.jpg", "a_thumb.jpg"], ...}`; the first
    /// name is authoritative. Empty when no name could be found.
    StructuredName { names: Vec<String> },
}

impl PageEntry {
    /// The file name this entry refers to, if any.
    pub fn filename(&self) -> Option<&str> {
        match self {
            PageEntry::PlainName(name) => Some(name.as_str()),
            PageEntry::StructuredName { names } => names.first().map(String::as_str),
        }
        .filter(|n| !n.is_empty())
    }
}

impl From<&Value> for PageEntry {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => PageEntry::PlainName(s.clone()),
            Value::Object(map) => {
                let names = match map.get("n") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .take(1)
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    Some(Value::String(s)) => vec![s.clone()],
                    _ => Vec::new(),
                };
                PageEntry::StructuredName { names }
            }
            _ => PageEntry::StructuredName { names: Vec::new() },
        }
    }
}

/// Decode the raw `fliphtml5_pages` value into an ordered entry list.
///
/// # Errors
/// [`FlipError::ManifestUnavailable`] when the value is missing, of the wrong
/// type, undecodable, or does not parse to an array.
pub async fn decode_pages(
    raw: Option<&Value>,
    decoder: Arc<dyn ManifestDecoder>,
) -> Result<Vec<Value>, FlipError> {
    match raw {
        Some(Value::Array(items)) => {
            info!("Book source: plain ({} entries)", items.len());
            Ok(items.clone())
        }
        Some(Value::String(s)) => {
            let text = s.trim();
            if text.starts_with('[') || text.starts_with('{') {
                info!("Book source: embedded JSON");
                return parse_pages_json(text);
            }

            info!("Book source: encrypted; decoding pages");
            let input = text.to_string();
            let decoded = tokio::task::spawn_blocking(move || decoder.decode(&input))
                .await
                .map_err(|e| FlipError::Internal(format!("Decode task panicked: {e}")))??;
            debug!("Decoded manifest: {} bytes", decoded.len());
            parse_pages_json(&decoded)
        }
        Some(other) => Err(FlipError::ManifestUnavailable {
            detail: format!("'{PAGES_KEY}' has unexpected type: {other}"),
        }),
        None => Err(FlipError::ManifestUnavailable {
            detail: format!("'{PAGES_KEY}' not found in book configuration"),
        }),
    }
}

/// Parse a JSON array, tolerating prefix/suffix noise around it.
pub fn parse_pages_json(text: &str) -> Result<Vec<Value>, FlipError> {
    let raw = text.trim();
    let parsed = serde_json::from_str::<Value>(raw).or_else(|_| {
        let start = raw.find('[');
        let end = raw.rfind(']');
        match (start, end) {
            (Some(s), Some(e)) if e > s => serde_json::from_str::<Value>(&raw[s..=e]),
            _ => serde_json::from_str::<Value>(""),
        }
    });

    match parsed {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(FlipError::ManifestUnavailable {
            detail: "decoded manifest is not a list".into(),
        }),
        Err(e) => Err(FlipError::ManifestUnavailable {
            detail: format!("decoded manifest is not valid JSON: {e}"),
        }),
    }
}
