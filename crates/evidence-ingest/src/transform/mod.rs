//! Turns extracted content into annotated tables.
//!
//! [`DataTransformer::transform`] is deterministic: the same content, quality
//! score and source reference always produce the same tables, so results are
//! recomputed on demand rather than stored.

pub mod free_text;

use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::config::TransformConfig;
use crate::extract::{CellValue, DataCategory, DataPoint, ExtractedContent, TableData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCategory {
    Market,
    Competitor,
    Financial,
    General,
}

impl From<DataCategory> for TableCategory {
    fn from(category: DataCategory) -> Self {
        match category {
            DataCategory::Market => TableCategory::Market,
            DataCategory::Competitor => TableCategory::Competitor,
            DataCategory::Financial => TableCategory::Financial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FootnoteType {
    Citation,
    Explanation,
    Caveat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Footnote {
    pub id: String,
    pub text: String,
    pub source: Option<String>,
    pub confidence: f64,
    #[serde(rename = "type")]
    pub footnote_type: FootnoteType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Built from rule matches in `StructuredData`.
    StructuredPattern,
    /// A table present in the source document.
    TableExtraction,
    FreeText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub category: TableCategory,
    pub extraction_method: ExtractionMethod,
    pub source_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedTable {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub footnotes: Vec<Footnote>,
    pub metadata: TableMetadata,
    pub quality_score: f64,
}

impl TransformedTable {
    pub fn caveats(&self) -> impl Iterator<Item = &Footnote> {
        self.footnotes
            .iter()
            .filter(|f| f.footnote_type == FootnoteType::Caveat)
    }
}

const CATEGORY_KEYWORDS: &[(TableCategory, &[&str])] = &[
    (
        TableCategory::Market,
        &["market", "share", "cagr", "growth", "demand", "市場", "シェア", "成長", "需要"],
    ),
    (
        TableCategory::Competitor,
        &["competitor", "rival", "vendor", "player", "競合", "他社", "競争"],
    ),
    (
        TableCategory::Financial,
        &[
            "revenue", "sales", "profit", "cost", "budget", "expense", "売上", "利益", "費用",
            "経費", "予算", "投資", "金額",
        ],
    ),
];

/// Scores each category by keyword hits in the title, headers and first
/// column. Ties go to the earlier category; no hits means `General`.
pub fn infer_category(table: &TableData) -> TableCategory {
    let mut haystack = String::new();
    if let Some(title) = &table.title {
        haystack.push_str(title);
        haystack.push('\n');
    }
    for header in &table.headers {
        haystack.push_str(header);
        haystack.push('\n');
    }
    for row in &table.rows {
        if let Some(CellValue::Text(first)) = row.first() {
            haystack.push_str(first);
            haystack.push('\n');
        }
    }
    let haystack = haystack.to_lowercase();

    let mut best = (TableCategory::General, 0usize);
    for (category, keywords) in CATEGORY_KEYWORDS {
        let score: usize = keywords
            .iter()
            .map(|k| haystack.matches(k).count())
            .sum();
        if score > best.1 {
            best = (*category, score);
        }
    }
    best.0
}

/// Numbered footnotes for one table.
struct FootnoteBuilder {
    prefix: String,
    footnotes: Vec<Footnote>,
}

impl FootnoteBuilder {
    fn new(table_index: usize) -> Self {
        Self {
            prefix: format!("t{}", table_index + 1),
            footnotes: Vec::new(),
        }
    }

    fn push(
        &mut self,
        footnote_type: FootnoteType,
        text: String,
        source: Option<String>,
        confidence: f64,
    ) {
        let id = format!("{}-fn{}", self.prefix, self.footnotes.len() + 1);
        self.footnotes.push(Footnote {
            id,
            text,
            source,
            confidence,
            footnote_type,
        });
    }

    fn finish(self) -> Vec<Footnote> {
        self.footnotes
    }
}

pub struct DataTransformer {
    quality_threshold: f64,
    context_chars: usize,
}

impl DataTransformer {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            quality_threshold: config.quality_threshold,
            context_chars: config.context_chars,
        }
    }

    pub fn quality_threshold(&self) -> f64 {
        self.quality_threshold
    }

    /// Builds structured-category tables, then enhanced copies of the
    /// document's own tables, then a free-text figures table.
    pub fn transform(
        &self,
        content: &ExtractedContent,
        quality_score: f64,
        source_ref: Option<&str>,
    ) -> Vec<TransformedTable> {
        let quality = if quality_score.is_finite() {
            quality_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let _span = info_span!(
            "transform",
            tables = content.tables.len(),
            quality = quality
        )
        .entered();

        let mut tables = Vec::new();

        if let Some(structured) = &content.structured_data {
            for category in [
                DataCategory::Market,
                DataCategory::Competitor,
                DataCategory::Financial,
            ] {
                let points = structured.category(category);
                if !points.is_empty() {
                    let index = tables.len();
                    let table = self.structured_table(index, category, points, quality, source_ref);
                    tables.push(table);
                }
            }
        }

        for table in &content.tables {
            let index = tables.len();
            tables.push(self.enhanced_table(index, table, quality, source_ref));
        }

        let next_index = tables.len();
        if let Some(table) = self.free_text_table(next_index, &content.text, quality, source_ref) {
            tables.push(table);
        }

        tracing::debug!(count = tables.len(), "Transformed content into tables");
        tables
    }

    fn structured_table(
        &self,
        index: usize,
        category: DataCategory,
        points: &[DataPoint],
        quality: f64,
        source_ref: Option<&str>,
    ) -> TransformedTable {
        let title = match category {
            DataCategory::Market => "Market data",
            DataCategory::Competitor => "Competitor data",
            DataCategory::Financial => "Financial data",
        };

        let mut footnotes = FootnoteBuilder::new(index);
        let rows = points
            .iter()
            .enumerate()
            .map(|(row, point)| {
                footnotes.push(
                    FootnoteType::Citation,
                    format!("Row {}: \"{}\"", row + 1, point.context),
                    source_ref.map(str::to_string),
                    quality,
                );
                vec![
                    CellValue::Text(point.label.clone()),
                    point
                        .value
                        .map(CellValue::Number)
                        .unwrap_or_else(|| CellValue::Text(String::new())),
                    CellValue::Text(point.unit.clone().unwrap_or_default()),
                    CellValue::Text(point.raw.clone()),
                ]
            })
            .collect();

        self.finish(
            title.to_string(),
            vec![
                "Item".to_string(),
                "Value".to_string(),
                "Unit".to_string(),
                "Source text".to_string(),
            ],
            rows,
            footnotes,
            TableCategory::from(category),
            ExtractionMethod::StructuredPattern,
            quality,
        )
    }

    fn enhanced_table(
        &self,
        index: usize,
        table: &TableData,
        quality: f64,
        source_ref: Option<&str>,
    ) -> TransformedTable {
        let mut footnotes = FootnoteBuilder::new(index);
        for note in &table.footnotes {
            footnotes.push(FootnoteType::Explanation, note.clone(), None, quality);
        }
        if let Some(source) = table.source.as_deref().or(source_ref) {
            footnotes.push(
                FootnoteType::Citation,
                format!("Source: {}", source),
                Some(source.to_string()),
                quality,
            );
        }

        self.finish(
            table
                .title
                .clone()
                .unwrap_or_else(|| format!("Table {}", index + 1)),
            table.headers.clone(),
            table.rows.clone(),
            footnotes,
            infer_category(table),
            ExtractionMethod::TableExtraction,
            quality,
        )
    }

    fn free_text_table(
        &self,
        index: usize,
        text: &str,
        quality: f64,
        source_ref: Option<&str>,
    ) -> Option<TransformedTable> {
        let figures = free_text::find_figures(text, self.context_chars);
        if figures.is_empty() {
            return None;
        }

        let rows: Vec<Vec<CellValue>> = figures
            .iter()
            .map(|f| {
                vec![
                    CellValue::Number(f.value),
                    CellValue::Text(f.unit.clone()),
                    CellValue::Text(f.context.clone()),
                ]
            })
            .collect();

        let headers = vec![
            "Value".to_string(),
            "Unit".to_string(),
            "Context".to_string(),
        ];
        let category = infer_category(&TableData {
            headers: headers.clone(),
            rows: figures
                .iter()
                .map(|f| vec![CellValue::Text(f.context.clone())])
                .collect(),
            ..Default::default()
        });

        let mut footnotes = FootnoteBuilder::new(index);
        footnotes.push(
            FootnoteType::Explanation,
            format!(
                "Figures detected in running text; each row keeps up to {} characters of surrounding context.",
                self.context_chars
            ),
            source_ref.map(str::to_string),
            quality,
        );

        Some(self.finish(
            "Extracted from free text".to_string(),
            headers,
            rows,
            footnotes,
            category,
            ExtractionMethod::FreeText,
            quality,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        title: String,
        headers: Vec<String>,
        rows: Vec<Vec<CellValue>>,
        mut footnotes: FootnoteBuilder,
        category: TableCategory,
        extraction_method: ExtractionMethod,
        quality: f64,
    ) -> TransformedTable {
        if quality < self.quality_threshold {
            footnotes.push(
                FootnoteType::Caveat,
                format!(
                    "OCR quality is {:.0}%. Verify these figures manually against the source document.",
                    quality * 100.0
                ),
                None,
                quality,
            );
        }

        TransformedTable {
            title,
            headers,
            rows,
            footnotes: footnotes.finish(),
            metadata: TableMetadata {
                category,
                extraction_method,
                source_quality: quality,
            },
            quality_score: quality,
        }
    }
}

impl Default for DataTransformer {
    fn default() -> Self {
        Self::new(&TransformConfig::default())
    }
}
