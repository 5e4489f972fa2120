//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Uploaded filenames and fetched URLs are user-controlled; these functions
//! keep directory layouts, credentials and query strings out of spans.

use std::path::Path;

/// Returns only the final component of an uploaded filename.
///
/// Browsers on some platforms send the full client-side path; both `/` and
/// `\` separators are stripped.
pub fn redact_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() {
        "<unknown>".to_string()
    } else {
        base.to_string()
    }
}

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo, query string and fragment from a URL.
///
/// - `https://user:pw@example.com/a?token=x#top` → `https://****@example.com/a`
/// - `https://example.com/report` → `https://example.com/report` (no change)
pub fn redact_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &without_query[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    without_query.to_string()
}
