//! Visible text, tables and images from an HTML document.
//!
//! Fetched pages are frequently malformed, so extraction is pattern based
//! rather than a strict parse. Nested tables are flattened into their parent.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::csv::coerce_cell;
use super::{ProcessedImage, TableData};

static RE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").unwrap());
static RE_HIDDEN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["head", "script", "style", "noscript", "template", "nav", "footer"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
        .collect()
});
static RE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").unwrap());
static RE_CAPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<caption\b[^>]*>(.*?)</caption\s*>").unwrap());
static RE_ROW_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<tr\b[^>]*>").unwrap());
static RE_ROW_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</tr\s*>").unwrap());
static RE_CELL_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<t[hd]\b[^>]*>").unwrap());
static RE_CELL_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</t[hd]\s*>").unwrap());
static RE_IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static RE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\s([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .unwrap()
});
static RE_BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|tr|h[1-6]|section|article|table|blockquote)\s*>")
        .unwrap()
});
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{00A0}\u{3000}]+").unwrap());

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlDocument {
    pub title: Option<String>,
    pub text: String,
    pub tables: Vec<TableData>,
    pub images: Vec<ProcessedImage>,
}

/// Extracts content from `html`. Relative image URLs are resolved against
/// `base_url` when given.
pub fn extract_html(html: &str, base_url: Option<&str>) -> HtmlDocument {
    let without_comments = RE_COMMENT.replace_all(html, "");

    let title = RE_TITLE
        .captures(&without_comments)
        .map(|c| inline_text(&c[1]))
        .filter(|t| !t.is_empty());

    let mut visible = without_comments.into_owned();
    for re in RE_HIDDEN.iter() {
        visible = re.replace_all(&visible, " ").into_owned();
    }

    let source = base_url.map(str::to_string);
    let tables = RE_TABLE
        .captures_iter(&visible)
        .filter_map(|c| parse_table(&c[1], source.clone()))
        .collect();

    let base = base_url.and_then(|u| reqwest::Url::parse(u).ok());
    let images = RE_IMG
        .find_iter(&visible)
        .filter_map(|m| parse_img(m.as_str(), base.as_ref()))
        .collect();

    HtmlDocument {
        title,
        text: visible_text(&visible),
        tables,
        images,
    }
}

/// True when the bytes look like an HTML document rather than plain text.
pub fn looks_like_html(text: &str) -> bool {
    let head: String = text
        .trim_start_matches('\u{FEFF}')
        .trim_start()
        .chars()
        .take(64)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

fn parse_table(inner: &str, source: Option<String>) -> Option<TableData> {
    let title = RE_CAPTION
        .captures(inner)
        .map(|c| inline_text(&c[1]))
        .filter(|t| !t.is_empty());

    let mut header_row: Option<Vec<String>> = None;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for (_, row) in element_bodies(inner, &RE_ROW_START, &RE_ROW_END) {
        let cells: Vec<(bool, String)> = element_bodies(row, &RE_CELL_START, &RE_CELL_END)
            .into_iter()
            .map(|(tag, body)| {
                let is_th = tag.get(1..3).is_some_and(|name| name.eq_ignore_ascii_case("th"));
                (is_th, inline_text(body))
            })
            .collect();
        if cells.is_empty() {
            continue;
        }
        let all_header = cells.iter().all(|(is_th, _)| *is_th);
        let values = cells.into_iter().map(|(_, v)| v).collect();
        if header_row.is_none() && rows.is_empty() && all_header {
            header_row = Some(values);
        } else {
            rows.push(values);
        }
    }

    let headers = match header_row {
        Some(h) => h,
        None if !rows.is_empty() => rows.remove(0),
        None => return None,
    };

    Some(TableData {
        title,
        headers,
        rows: rows
            .iter()
            .map(|r| r.iter().map(|cell| coerce_cell(cell)).collect())
            .collect(),
        footnotes: Vec::new(),
        source,
    })
}

fn parse_img(tag: &str, base: Option<&reqwest::Url>) -> Option<ProcessedImage> {
    let src = attribute(tag, "src")?;
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    let url = match base {
        Some(base) => base.join(&src).map(|u| u.to_string()).unwrap_or(src),
        None => src,
    };
    let dimension = |name: &str| attribute(tag, name).and_then(|v| v.trim().parse::<u32>().ok());

    Some(ProcessedImage {
        url: Some(url),
        alt: attribute(tag, "alt").filter(|a| !a.is_empty()),
        width: dimension("width"),
        height: dimension("height"),
        ocr_text: None,
    })
}

/// Bodies of elements whose end tag may be omitted. Each runs from its start
/// tag to its end tag, the next start tag, or the end of `fragment`, and is
/// paired with the start tag text.
fn element_bodies<'a>(fragment: &'a str, start: &Regex, end: &Regex) -> Vec<(&'a str, &'a str)> {
    let opens: Vec<regex::Match<'a>> = start.find_iter(fragment).collect();
    opens
        .iter()
        .enumerate()
        .map(|(i, open)| {
            let limit = opens.get(i + 1).map_or(fragment.len(), |next| next.start());
            let body = &fragment[open.end()..limit];
            let body = end.find(body).map_or(body, |close| &body[..close.start()]);
            (open.as_str(), body)
        })
        .collect()
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    let caps = RE_ATTR
        .captures_iter(tag)
        .find(|c| c[1].eq_ignore_ascii_case(name))?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    Some(decode_entities(value).trim().to_string())
}

fn inline_text(fragment: &str) -> String {
    let stripped = RE_TAG.replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn visible_text(html: &str) -> String {
    let with_breaks = RE_BLOCK_BREAK.replace_all(html, "\n");
    let stripped = RE_TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);
    decoded
        .lines()
        .map(|line| RE_SPACES.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolves a named or numeric character reference (without `&` and `;`).
pub fn resolve_entity(name: &str) -> Option<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "yen" => '¥',
        "copy" => '©',
        "reg" => '®',
        "euro" => '€',
        "pound" => '£',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "times" => '×',
        "middot" => '·',
        _ => return None,
    };
    Some(c.to_string())
}

/// Replaces character references; unknown names are left as written.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    RE_ENTITY
        .replace_all(text, |caps: &Captures| {
            resolve_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
