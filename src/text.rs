//! Small text helpers for file names and terminal output.

/// Turn a book title into a file-system friendly file stem.
///
/// Keeps alphanumerics (any script), space, `-`, `_` and `.`; everything
/// else becomes `_`. Spaces become `_` after trimming. Falls back to `book`.
pub fn sanitize_filename(value: Option<&str>) -> String {
    let Some(value) = value else {
        return "book".to_string();
    };
    let safe: String = value
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let name = safe.trim().replace(' ', "_");
    if name.is_empty() {
        "book".to_string()
    } else {
        name
    }
}

/// Collapse `<br>` markers and runs of whitespace into single spaces,
/// optionally truncating to `max_len` characters with a trailing `...`.
pub fn clean_description(value: Option<&str>, max_len: Option<usize>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let replaced = value
        .replace("<br/>", " ")
        .replace("<br />", " ")
        .replace("<br>", " ");
    let desc = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

    match max_len {
        Some(max) if desc.chars().count() > max => {
            let head: String = desc.chars().take(max.saturating_sub(3)).collect();
            format!("{}...", head.trim_end())
        }
        _ => desc,
    }
}

/// Shorten a label for a progress line by eliding its middle.
pub fn short_label(value: &str, max_len: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if value.is_empty() {
        return "-".to_string();
    }
    if chars.len() <= max_len {
        return value.to_string();
    }
    if max_len < 10 {
        return chars[..max_len].iter().collect();
    }
    let head = max_len / 2 - 2;
    let tail = max_len - head - 3;
    let mut out: String = chars[..head].iter().collect();
    out.push_str("...");
    out.extend(&chars[chars.len() - tail..]);
    out
}
