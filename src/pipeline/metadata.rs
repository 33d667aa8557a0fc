//! Reader-page scraping: book title/description and the config script link.

use crate::output::BookMetadata;
use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Substring identifying the configuration script among `<script src>` tags.
pub const CONFIG_SCRIPT_MARKER: &str = "javascript/config.js";

static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("static selector is valid"));
static META: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta").expect("static selector is valid"));
static SCRIPT_SRC: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[src]").expect("static selector is valid"));

/// Extract title and description from the reader page.
///
/// Title preference: `og:title`, `twitter:title`, `<title>`, then the
/// description. Description preference: `og:description`, `description`,
/// `twitter:description`. Never fails; missing values are `None`.
#[instrument(skip(html), fields(html_size = html.len()))]
pub fn extract_metadata(html: &str) -> BookMetadata {
    let document = Html::parse_document(html);
    let tags = collect_meta(&document);

    let pick = |keys: &[&str]| keys.iter().find_map(|k| tags.get(*k).cloned());

    let title = pick(&["og:title", "twitter:title", "title", "description"]);
    let description = pick(&["og:description", "description", "twitter:description"]);
    debug!(?title, has_description = description.is_some(), "Extracted book metadata");

    BookMetadata { title, description }
}

/// Find the configuration script URL, resolved against `base`.
pub fn find_config_url(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    document
        .select(&SCRIPT_SRC)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| src.contains(CONFIG_SCRIPT_MARKER))
        .and_then(|src| base.join(src).ok())
}

/// Lower-cased `name`/`property` → `content` map, plus the `<title>` text
/// under the key `title`.
fn collect_meta(document: &Html) -> HashMap<String, String> {
    let mut tags = HashMap::new();

    if let Some(title) = document.select(&TITLE).next() {
        let text = title.text().collect::<String>();
        let text = text.trim();
        if !text.is_empty() {
            tags.insert("title".to_string(), text.to_string());
        }
    }

    for el in document.select(&META) {
        let attrs = el.value();
        let Some(content) = attrs.attr("content").filter(|c| !c.is_empty()) else {
            continue;
        };
        for key in [attrs.attr("name"), attrs.attr("property")].into_iter().flatten() {
            tags.insert(key.to_lowercase(), content.to_string());
        }
    }

    tags
}
