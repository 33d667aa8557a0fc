//! Manifest entries → concrete download tasks.
//!
//! Output names carry a 1-based, zero-padded index prefix so a plain
//! lexicographic sort of the page directory reproduces manifest order. The
//! prefix is three digits wide, or as wide as the entry count needs for
//! books of 1000 pages or more.

use crate::config::SizeTier;
use crate::output::DownloadTask;
use crate::pipeline::manifest::PageEntry;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

/// Build one task per manifest entry, in manifest order.
///
/// Entries with no derivable file name, an unsafe leaf, or an unresolvable
/// URL become placeholder tasks with both fields `None`.
pub fn build_tasks(base: &Url, entries: &[Value], size: SizeTier) -> Vec<DownloadTask> {
    let width = index_width(entries.len());
    let tasks: Vec<DownloadTask> = entries
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let entry = PageEntry::from(raw);
            let resolved = entry.filename().and_then(|name| {
                let leaf = safe_leaf_name(name)?;
                let url = build_page_url(base, name, size)?;
                Some((url, format!("{:0width$}_{leaf}", index + 1)))
            });

            match resolved {
                Some((url, out_name)) => DownloadTask {
                    index,
                    url: Some(url.to_string()),
                    out_name: Some(out_name),
                },
                None => {
                    warn!("Page {}: no usable file name in manifest entry", index + 1);
                    DownloadTask {
                        index,
                        url: None,
                        out_name: None,
                    }
                }
            }
        })
        .collect();

    debug!("Built {} download tasks ({} tier)", tasks.len(), size);
    tasks
}

/// Digits in the index prefix: at least 3, more when `count` needs it.
pub fn index_width(count: usize) -> usize {
    count.to_string().len().max(3)
}

/// Reduce a manifest file name to a file-system safe leaf.
///
/// Drops any query or fragment, keeps only the last path segment (either
/// separator), and maps every character outside `[A-Za-z0-9._-]` to `_`.
/// Returns `None` when nothing usable is left or the result is `.`/`..`.
pub fn safe_leaf_name(name: &str) -> Option<String> {
    let without_suffix = name.split(['?', '#']).next().unwrap_or_default();
    let leaf = without_suffix.rsplit(['/', '\\']).next().unwrap_or_default();

    let safe: String = leaf
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match safe.as_str() {
        "" | "." | ".." => None,
        _ => Some(safe),
    }
}

/// Resolve a manifest file name into an absolute page image URL.
pub fn build_page_url(base: &Url, name: &str, size: SizeTier) -> Option<Url> {
    if name.starts_with("http://") || name.starts_with("https://") {
        return Url::parse(name).ok();
    }

    let mut path = name;
    if let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    if let Some(rest) = path.strip_prefix('/') {
        path = rest;
    }

    if path.starts_with("files/") {
        base.join(path).ok()
    } else {
        base.join(&format!("files/{}/{path}", size.as_path_segment()))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://online.example.com/pub/book/").unwrap()
    }

    #[test]
    fn plain_manifest_scenario() {
        let entries = vec![json!("a.jpg"), json!("b.jpg")];
        let tasks = build_tasks(&base(), &entries, SizeTier::Large);
        assert_eq!(
            tasks,
            vec![
                DownloadTask {
                    index: 0,
                    url: Some("https://online.example.com/pub/book/files/large/a.jpg".into()),
                    out_name: Some("001_a.jpg".into()),
                },
                DownloadTask {
                    index: 1,
                    url: Some("https://online.example.com/pub/book/files/large/b.jpg".into()),
                    out_name: Some("002_b.jpg".into()),
                },
            ]
        );
    }

    #[test]
    fn one_task_per_entry_in_sorted_order() {
        let entries: Vec<Value> = (0..120)
            .map(|i| {
                if i % 7 == 0 {
                    json!({"x": 1})
                } else {
                    json!({"n": [format!("p{i}.webp")]})
                }
            })
            .collect();
        let tasks = build_tasks(&base(), &entries, SizeTier::Thumb);
        assert_eq!(tasks.len(), entries.len());

        let names: Vec<&str> = tasks.iter().filter_map(|t| t.out_name.as_deref()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(tasks.iter().filter(|t| t.out_name.is_none()).count(), 18);
        assert!(tasks[1].url.as_deref().unwrap().contains("/files/thumb/"));
    }

    #[test]
    fn prefix_widens_past_999_pages() {
        let entries: Vec<Value> = (1..=1001).map(|i| json!(format!("p{i}.jpg"))).collect();
        let tasks = build_tasks(&base(), &entries, SizeTier::Large);

        assert_eq!(tasks[0].out_name.as_deref(), Some("0001_p1.jpg"));
        assert_eq!(tasks[999].out_name.as_deref(), Some("1000_p1000.jpg"));

        let mut sorted: Vec<&str> = tasks.iter().filter_map(|t| t.out_name.as_deref()).collect();
        sorted.sort();
        let in_order: Vec<&str> = tasks.iter().filter_map(|t| t.out_name.as_deref()).collect();
        assert_eq!(sorted, in_order);
    }

    #[test]
    fn index_width_floor_is_three() {
        assert_eq!(index_width(0), 3);
        assert_eq!(index_width(999), 3);
        assert_eq!(index_width(1000), 4);
        assert_eq!(index_width(12345), 5);
    }

    #[test]
    fn placeholder_for_unnamed_entries() {
        let tasks = build_tasks(&base(), &[json!(null), json!(""), json!("..")], SizeTier::Large);
        assert!(tasks.iter().all(|t| t.url.is_none() && t.out_name.is_none()));
        assert_eq!(tasks[2].index, 2);
    }

    #[test]
    fn url_building_rules() {
        let b = base();
        let large = SizeTier::Large;
        assert_eq!(
            build_page_url(&b, "https://cdn.example.com/x.jpg", large).unwrap().as_str(),
            "https://cdn.example.com/x.jpg"
        );
        assert_eq!(
            build_page_url(&b, "./files/page/1.jpg", large).unwrap().as_str(),
            "https://online.example.com/pub/book/files/page/1.jpg"
        );
        assert_eq!(
            build_page_url(&b, "/c.jpg", large).unwrap().as_str(),
            "https://online.example.com/pub/book/files/large/c.jpg"
        );
        assert_eq!(
            build_page_url(&b, "sub/d.jpg?v=2", large).unwrap().as_str(),
            "https://online.example.com/pub/book/files/large/sub/d.jpg?v=2"
        );
    }

    #[test]
    fn leaf_names_are_sanitized() {
        assert_eq!(safe_leaf_name("a.jpg").as_deref(), Some("a.jpg"));
        assert_eq!(safe_leaf_name("dir/sub/p 1.jpg?x=1#f").as_deref(), Some("p_1.jpg"));
        assert_eq!(safe_leaf_name("..\\..\\evil.png").as_deref(), Some("evil.png"));
        assert_eq!(safe_leaf_name("ünï.jpg").as_deref(), Some("_n_.jpg"));
        assert_eq!(safe_leaf_name("a/.."), None);
        assert_eq!(safe_leaf_name("a/"), None);
        assert_eq!(safe_leaf_name("?q"), None);
    }

    #[test]
    fn sanitized_leaf_stays_inside_directory() {
        let dir = std::path::Path::new("/tmp/pages");
        for hostile in ["../../etc/passwd", "/abs/path", "..", "a/../../b", "C:\\x\\..\\y"] {
            if let Some(leaf) = safe_leaf_name(hostile) {
                let joined = dir.join(format!("001_{leaf}"));
                assert_eq!(joined.parent(), Some(dir), "{hostile}");
            }
        }
    }
}
