//! Share-link resolution: any public FlipHTML5 link → reader base URL.
//!
//! Share links come in many shapes (`fliphtml5.com/pub/book/Title`,
//! `online.fliphtml5.com/pub/book/#p=3`, with or without scheme), but the
//! reader application always lives at `https://online.fliphtml5.com/<pub>/<book>/`.
//! Only the first two path segments matter.

use crate::error::FlipError;
use reqwest::Url;
use tracing::debug;

/// Host that serves the reader application for every publication.
pub const READER_HOST: &str = "online.fliphtml5.com";

/// Resolve a share link into the canonical reader base URL (trailing `/`).
///
/// # Errors
/// [`FlipError::InvalidUrl`] when the link is unparseable or its path has
/// fewer than two non-empty segments.
pub fn resolve_share_url(input: &str) -> Result<Url, FlipError> {
    let input = input.trim();
    let invalid = || FlipError::InvalidUrl {
        url: input.to_string(),
    };

    let with_scheme = if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{input}")
    };

    let parsed = Url::parse(&with_scheme).map_err(|_| invalid())?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|s| !s.is_empty());

    let (publisher, book) = match (segments.next(), segments.next()) {
        (Some(p), Some(b)) => (p, b),
        _ => return Err(invalid()),
    };

    let base = Url::parse(&format!("https://{READER_HOST}/{publisher}/{book}/"))
        .map_err(|_| invalid())?;
    debug!("Resolved {} → {}", input, base);
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_share_links() {
        for input in [
            "https://fliphtml5.com/abcde/fghi/My-Book/",
            "http://fliphtml5.com/abcde/fghi",
            "fliphtml5.com/abcde/fghi/",
            "https://online.fliphtml5.com/abcde/fghi/#p=4",
            "https://online.fliphtml5.com//abcde//fghi/index.html?x=1",
        ] {
            let url = resolve_share_url(input).unwrap();
            assert_eq!(url.as_str(), "https://online.fliphtml5.com/abcde/fghi/", "{input}");
        }
    }

    #[test]
    fn rejects_short_paths() {
        for input in [
            "https://fliphtml5.com/",
            "https://fliphtml5.com/abcde",
            "fliphtml5.com//abcde/",
            "",
        ] {
            let err = resolve_share_url(input).unwrap_err();
            assert!(matches!(err, FlipError::InvalidUrl { .. }), "{input}");
        }
    }

    #[test]
    fn output_always_has_reader_shape() {
        let url = resolve_share_url("example.org/p/b/c/d").unwrap();
        assert_eq!(url.host_str(), Some(READER_HOST));
        assert_eq!(url.scheme(), "https");
        assert!(url.path().ends_with('/'));
        assert_eq!(url.path(), "/p/b/");
    }
}
