//! Amount-plus-unit figures found in running text.

use std::sync::LazyLock;

use regex::Regex;

use crate::extract::structured::{context_window, parse_amount};

static RE_FIGURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<currency>[$¥€£])?\s?(?P<value>[0-9][0-9,，]*(?:\.[0-9]+)?)\s*(?P<unit>兆円|億円|百万円|千万円|千円|万円|円|%|％|人|件|社|台|(?i:(?:trillion|billion|million|thousand|percent|usd|jpy|yen|dollars)\b))?",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct FigureMatch {
    pub value: f64,
    pub unit: String,
    pub raw: String,
    pub context: String,
}

/// Numbers that carry a currency symbol or a unit token. Bare numbers such as
/// years are skipped.
pub fn find_figures(text: &str, context_chars: usize) -> Vec<FigureMatch> {
    let mut figures: Vec<FigureMatch> = Vec::new();

    for caps in RE_FIGURE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let currency = caps.name("currency").map(|m| m.as_str());
        let unit = caps.name("unit").map(|m| m.as_str());

        let unit = match (currency, unit) {
            (Some(c), Some(u)) => format!("{} {}", c, u),
            (Some(c), None) => c.to_string(),
            (None, Some(u)) => u.to_string(),
            (None, None) => continue,
        };
        let Some(value) = caps.name("value").and_then(|m| parse_amount(m.as_str())) else {
            continue;
        };

        let raw = whole.as_str().trim().to_string();
        if figures.iter().any(|f| f.raw == raw) {
            continue;
        }
        figures.push(FigureMatch {
            value,
            unit,
            raw,
            context: context_window(text, whole.start(), whole.end(), context_chars),
        });
    }

    figures
}
