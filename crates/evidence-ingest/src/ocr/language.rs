//! Script-based language inference for recognized text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Japanese,
    Mixed,
    English,
    Unknown,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Japanese => "ja",
            Language::Mixed => "mixed",
            Language::English => "en",
            Language::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Hiragana, katakana (full and half width) and CJK ideographs.
pub fn is_japanese_char(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{31F0}'..='\u{31FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF66}'..='\u{FF9F}'
    )
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}')
}

/// Share of Latin letters among the non-whitespace characters of `text`.
pub fn latin_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut latin = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if is_latin_letter(c) {
            latin += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        latin as f64 / total as f64
    }
}

/// Any Japanese code point makes the text Japanese, or mixed when Latin
/// letters still dominate (> 70%). Without Japanese, more than half Latin
/// letters means English.
pub fn infer_language(text: &str) -> Language {
    let ratio = latin_ratio(text);
    if text.chars().any(is_japanese_char) {
        if ratio > 0.7 {
            Language::Mixed
        } else {
            Language::Japanese
        }
    } else if ratio > 0.5 {
        Language::English
    } else {
        Language::Unknown
    }
}
