//! Reader-page and configuration fetches.
//!
//! Both requests are one-shot: a failure here means the book cannot be
//! enumerated at all, so errors are fatal [`FlipError`]s and there is no
//! retry at this layer (page images get their own retry loop in
//! [`super::download`]).
//!
//! The configuration resource is JavaScript, not JSON:
//!
//! ```text
//! var htmlConfig = { "fliphtml5_pages": ..., ... };
//! ```
//!
//! so the assignment prefix and trailing `;` are stripped before parsing.

use crate::config::DownloadConfig;
use crate::error::FlipError;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Path of the configuration script relative to the reader base URL.
pub const DEFAULT_CONFIG_PATH: &str = "javascript/config.js";

const CONFIG_PREFIX: &str = "var htmlConfig = ";

/// Build the shared HTTP client used for every request in a run.
///
/// Connect and read each get their own ceiling; exceeding either surfaces as
/// a timeout error, which the page downloader treats as transient.
pub fn build_client(config: &DownloadConfig) -> Result<Client, FlipError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| FlipError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// GET `url` and return the body as text.
pub async fn fetch_text(client: &Client, url: &Url, timeout_secs: u64) -> Result<String, FlipError> {
    debug!("GET {}", url);
    let fetch_err = |e: reqwest::Error| {
        if e.is_timeout() {
            FlipError::FetchTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FlipError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url.clone()).send().await.map_err(fetch_err)?;

    if !response.status().is_success() {
        return Err(FlipError::FetchFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    response.text().await.map_err(fetch_err)
}

/// Fetch and parse the book configuration object.
pub async fn fetch_config(
    client: &Client,
    config_url: &Url,
    timeout_secs: u64,
) -> Result<Map<String, Value>, FlipError> {
    let body = fetch_text(client, config_url, timeout_secs).await?;
    let config = parse_config_body(&body).map_err(|detail| FlipError::ConfigParseFailed {
        url: config_url.to_string(),
        detail,
    })?;
    info!("Loaded book configuration ({} keys)", config.len());
    Ok(config)
}

/// Strip the `var htmlConfig = ...;` wrapper and parse the JSON object.
pub fn parse_config_body(body: &str) -> Result<Map<String, Value>, String> {
    let mut text = body.trim();
    if let Some(rest) = text.strip_prefix(CONFIG_PREFIX) {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(';') {
        text = rest;
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_assignment_wrapper() {
        let body = "var htmlConfig = {\"fliphtml5_pages\":[\"a.jpg\"],\"meta\":{}};\n";
        let cfg = parse_config_body(body).unwrap();
        assert_eq!(cfg["fliphtml5_pages"], serde_json::json!(["a.jpg"]));
    }

    #[test]
    fn accepts_bare_json() {
        let cfg = parse_config_body("{\"a\": 1}").unwrap();
        assert_eq!(cfg["a"], 1);
    }

    #[test]
    fn rejects_non_object() {
        let err = parse_config_body("var htmlConfig = [1,2];").unwrap_err();
        assert!(err.contains("array"), "got: {err}");
        assert!(parse_config_body("var htmlConfig = {broken").is_err());
    }

    #[test]
    fn client_builds_with_defaults() {
        assert!(build_client(&DownloadConfig::default()).is_ok());
    }
}
