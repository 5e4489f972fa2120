//! Rule-driven detection of market, competitor and financial figures in
//! free text.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{DataPoint, StructuredData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Market,
    Competitor,
    Financial,
}

/// A pattern and the category its matches belong to.
///
/// Named groups: `label`, `value`, `unit`, `currency` and `name`. `name`
/// replaces the label for entity rules such as competitor mentions.
#[derive(Debug, Clone)]
pub struct StructuredRule {
    pub name: String,
    pub category: DataCategory,
    pub pattern: Regex,
}

impl StructuredRule {
    pub fn new(name: &str, category: DataCategory, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            category,
            pattern: Regex::new(pattern)?,
        })
    }
}

const JA_MONEY_UNIT: &str = r"兆円|億円|百万円|千万円|千円|万円|円";
const EN_MAGNITUDE: &str = r"trillion|billion|million|thousand|bn|mn|[kmb]";

fn default_rules() -> Vec<(&'static str, DataCategory, String)> {
    vec![
        (
            "market-size-ja",
            DataCategory::Market,
            format!(
                r"(?P<label>市場規模)[はがの：:]?\s*(?:約|およそ)?\s*(?P<value>[0-9][0-9,，]*(?:\.[0-9]+)?)\s*(?P<unit>{JA_MONEY_UNIT})"
            ),
        ),
        (
            "market-share-ja",
            DataCategory::Market,
            r"(?P<label>(?:市場)?シェア)[はがの：:]?\s*(?:約)?\s*(?P<value>[0-9]+(?:\.[0-9]+)?)\s*(?P<unit>%|％)"
                .to_string(),
        ),
        (
            "market-growth-ja",
            DataCategory::Market,
            r"(?P<label>(?:年平均)?成長率|CAGR)[はがの：:]?\s*(?:約|年率)?\s*(?P<value>[0-9]+(?:\.[0-9]+)?)\s*(?P<unit>%|％)"
                .to_string(),
        ),
        (
            "market-size-en",
            DataCategory::Market,
            format!(
                r"(?i)(?P<label>market\s+size)\D{{0,30}}?(?P<currency>[$¥€£])?\s?(?P<value>[0-9][0-9,]*(?:\.[0-9]+)?)\s*(?P<unit>{EN_MAGNITUDE})?\b"
            ),
        ),
        (
            "market-share-en",
            DataCategory::Market,
            r"(?i)(?P<label>market\s+share)\D{0,30}?(?P<value>[0-9]+(?:\.[0-9]+)?)\s*(?P<unit>%|percent)"
                .to_string(),
        ),
        (
            "market-growth-en",
            DataCategory::Market,
            r"(?i)(?P<label>CAGR|growth\s+rate)\D{0,20}?(?P<value>[0-9]+(?:\.[0-9]+)?)\s*(?P<unit>%|percent)"
                .to_string(),
        ),
        (
            "competitor-ja",
            DataCategory::Competitor,
            r"(?P<label>競合(?:他社|企業)?|競争相手)(?:は|として|には|に|：|:)\s*(?P<name>[^\s、。,，()（）]{2,30})"
                .to_string(),
        ),
        (
            "competitor-en",
            DataCategory::Competitor,
            r"(?P<label>(?i:competitors?|rivals?))\s+(?i:include|includes|are|such\s+as|like)\s+(?P<name>[A-Z][\w&.\-]*(?:\s+[A-Z][\w&.\-]*)*)"
                .to_string(),
        ),
        (
            "financial-ja",
            DataCategory::Financial,
            format!(
                r"(?P<label>売上高?|営業利益|経常利益|純利益|投資額|事業費|補助金額?|資本金)[はがの：:]?\s*(?:約)?\s*(?P<value>[0-9][0-9,，]*(?:\.[0-9]+)?)\s*(?P<unit>{JA_MONEY_UNIT})"
            ),
        ),
        (
            "financial-en",
            DataCategory::Financial,
            format!(
                r"(?i)(?P<label>revenue|sales|operating\s+(?:income|profit)|net\s+(?:income|profit)|investment|budget)\s*(?:of|was|were|is|reached|totaled|totalled|:)?\s*(?:approximately|about|around)?\s*(?P<currency>[$¥€£])\s?(?P<value>[0-9][0-9,]*(?:\.[0-9]+)?)\s*(?P<unit>{EN_MAGNITUDE})?\b"
            ),
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct StructuredExtractor {
    rules: Vec<StructuredRule>,
    context_chars: usize,
}

impl StructuredExtractor {
    pub fn new(context_chars: usize) -> Self {
        let rules = default_rules()
            .into_iter()
            .filter_map(|(name, category, pattern)| {
                match StructuredRule::new(name, category, &pattern) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        tracing::error!(rule = name, "Skipping invalid extraction rule: {}", e);
                        None
                    }
                }
            })
            .collect();
        Self {
            rules,
            context_chars,
        }
    }

    pub fn with_rule(mut self, rule: StructuredRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Runs every rule over `text`. Returns `None` when nothing matched.
    pub fn extract(&self, text: &str) -> Option<StructuredData> {
        let mut data = StructuredData::default();

        for rule in &self.rules {
            for caps in rule.pattern.captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                let group = |name: &str| caps.name(name).map(|m| m.as_str().trim().to_string());

                let label = group("name")
                    .or_else(|| group("label"))
                    .unwrap_or_else(|| rule.name.clone());
                let value = group("value").and_then(|v| parse_amount(&v));
                let unit = match (group("currency"), group("unit")) {
                    (Some(c), Some(u)) if !u.is_empty() => Some(format!("{} {}", c, u)),
                    (Some(c), _) => Some(c),
                    (None, Some(u)) if !u.is_empty() => Some(u),
                    _ => None,
                };

                let point = DataPoint {
                    label,
                    value,
                    unit,
                    raw: whole.as_str().trim().to_string(),
                    context: context_window(text, whole.start(), whole.end(), self.context_chars),
                    rule: rule.name.clone(),
                };

                let bucket = match rule.category {
                    DataCategory::Market => &mut data.market_data,
                    DataCategory::Competitor => &mut data.competitor_data,
                    DataCategory::Financial => &mut data.financial_data,
                };
                if !bucket.iter().any(|p| p.raw == point.raw) {
                    bucket.push(point);
                }
            }
        }

        if data.is_empty() {
            None
        } else {
            Some(data)
        }
    }
}

/// Parses an amount with `,` or full-width `，` thousands separators.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ',' | '，')).collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Up to `chars` characters either side of the byte range `start..end`.
pub fn context_window(text: &str, start: usize, end: usize, chars: usize) -> String {
    let before: String = {
        let mut prefix: Vec<char> = text[..start].chars().rev().take(chars).collect();
        prefix.reverse();
        prefix.into_iter().collect()
    };
    let after: String = text[end..].chars().take(chars).collect();
    format!("{}{}{}", before, &text[start..end], after)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
