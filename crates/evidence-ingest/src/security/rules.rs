//! Pattern tables for heuristic content scanning.
//!
//! Rules run over raw bytes so binary uploads are scanned without a lossy
//! UTF-8 conversion. Each table is independent, so callers can extend or
//! replace one without touching the others.

use regex::bytes::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A hit is recorded as a malware signature and makes the upload unsafe.
    Malware,
    /// A hit is recorded as a suspicious pattern only.
    Advisory,
}

#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: String,
    pub pattern: Regex,
    pub classification: Classification,
}

impl PatternRule {
    pub fn new(
        name: &str,
        pattern: &str,
        classification: Classification,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            pattern: Regex::new(pattern)?,
            classification,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<PatternRule>,
}

const MALWARE_RULES: &[(&str, &str)] = &[
    ("eval-call", r"(?i)\beval\s*\("),
    ("script-tag", r"(?i)<script\b"),
    ("javascript-uri", r"(?i)javascript\s*:"),
    (
        "inline-event-handler",
        r#"(?i)\bon(?:load|unload|error|abort|click|dblclick|mouse[a-z]+|key[a-z]+|focus|blur|submit|change|resize|scroll)\s*=\s*["']"#,
    ),
    ("hex-encoded-payload", r"(?i)(?:\\x[0-9a-f]{2}){8,}"),
    ("url-encoded-payload", r"(?i)(?:%[0-9a-f]{2}){12,}"),
    ("pe-executable-header", r"\AMZ"),
    ("elf-executable-header", r"(?-u)\A\x7FELF"),
];

const PDF_ADVISORY_RULES: &[(&str, &str)] = &[
    ("pdf-javascript", r"/JavaScript\b"),
    ("pdf-js-action", r"/JS\b"),
    ("pdf-open-action", r"/OpenAction\b"),
    ("pdf-auto-action", r"/AA\b"),
    ("pdf-launch-action", r"/Launch\b"),
    ("pdf-embedded-file", r"/EmbeddedFile\b"),
];

const SPREADSHEET_ADVISORY_RULES: &[(&str, &str)] = &[
    ("vba-project", r"(?i)vbaProject\.bin"),
    ("excel4-macro-sheet", r"(?i)xl/macrosheets/"),
    ("macro-enabled-content-type", r"(?i)macroEnabled"),
    ("auto-open-macro", r"(?i)\bAuto_?Open\b"),
];

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    fn from_table(table: &[(&str, &str)], classification: Classification) -> Self {
        let rules = table
            .iter()
            .filter_map(|(name, pattern)| match PatternRule::new(name, pattern, classification) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::error!(rule = name, "Skipping invalid scan rule: {}", e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Script-injection markers, encoded payloads and executable headers.
    pub fn malware_heuristics() -> Self {
        Self::from_table(MALWARE_RULES, Classification::Malware)
    }

    /// Embedded JavaScript and automatic actions in PDFs.
    pub fn pdf_advisories() -> Self {
        Self::from_table(PDF_ADVISORY_RULES, Classification::Advisory)
    }

    /// Macro markers in spreadsheet containers.
    pub fn spreadsheet_advisories() -> Self {
        Self::from_table(SPREADSHEET_ADVISORY_RULES, Classification::Advisory)
    }

    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of every rule that matches `bytes`, in table order.
    pub fn matches(&self, bytes: &[u8]) -> Vec<&PatternRule> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(bytes))
            .collect()
    }
}
