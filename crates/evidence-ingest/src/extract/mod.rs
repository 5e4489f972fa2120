//! Format-specific content extraction.
//!
//! [`FormatExtractor::extract`] dispatches on the detected evidence type and
//! returns a common [`ExtractedContent`]. Structured figures are detected on
//! the final text of every format.

pub mod csv;
pub mod fetch;
pub mod html;
pub mod image;
pub mod pdf;
pub mod spreadsheet;
pub mod structured;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::config::{ExtractionConfig, OcrConfig};
use crate::error::ProcessingError;
use crate::evidence::EvidenceType;
use crate::ocr::{OcrEngine, OcrOptions, OcrResult};

pub use fetch::{FetchedPage, PageFetcher};
pub use pdf::{PageRenderer, PopplerRenderer};
pub use structured::{DataCategory, StructuredExtractor, StructuredRule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub footnotes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImage {
    pub url: Option<String>,
    pub alt: Option<String>,
    /// Unknown for page images until they are fetched.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ocr_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub label: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    /// The matched text.
    pub raw: String,
    /// The match with surrounding text.
    pub context: String,
    /// Name of the rule that produced the match.
    pub rule: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredData {
    pub market_data: Vec<DataPoint>,
    pub competitor_data: Vec<DataPoint>,
    pub financial_data: Vec<DataPoint>,
}

impl StructuredData {
    pub fn is_empty(&self) -> bool {
        self.market_data.is_empty()
            && self.competitor_data.is_empty()
            && self.financial_data.is_empty()
    }

    pub fn category(&self, category: DataCategory) -> &[DataPoint] {
        match category {
            DataCategory::Market => &self.market_data,
            DataCategory::Competitor => &self.competitor_data,
            DataCategory::Financial => &self.financial_data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub text: String,
    pub tables: Vec<TableData>,
    pub images: Vec<ProcessedImage>,
    pub structured_data: Option<StructuredData>,
    pub ocr: Option<OcrResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub ocr_enabled: bool,
    pub ocr: OcrOptions,
    /// Page URL, used as the table source and to resolve relative links.
    pub source_url: Option<String>,
}

impl ExtractOptions {
    pub fn from_config(extraction: &ExtractionConfig, ocr: &OcrConfig) -> Self {
        Self {
            ocr_enabled: extraction.ocr_enabled,
            ocr: OcrOptions::from_config(ocr),
            source_url: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn without_ocr(mut self) -> Self {
        self.ocr_enabled = false;
        self
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default(), &OcrConfig::default())
    }
}

#[derive(Clone)]
pub struct FormatExtractor {
    inner: Arc<ExtractorInner>,
}

struct ExtractorInner {
    config: ExtractionConfig,
    ocr: Option<OcrEngine>,
    renderer: Arc<dyn PageRenderer>,
    structured: StructuredExtractor,
    fetcher: PageFetcher,
}

impl FormatExtractor {
    /// `ocr` is the engine used for images and sparse PDFs; without one those
    /// formats yield dimensions and native text only.
    pub fn new(
        config: ExtractionConfig,
        ocr: Option<OcrEngine>,
        structured: StructuredExtractor,
    ) -> Result<Self, ProcessingError> {
        Self::with_renderer(config, ocr, structured, Arc::new(PopplerRenderer))
    }

    pub fn with_renderer(
        config: ExtractionConfig,
        ocr: Option<OcrEngine>,
        structured: StructuredExtractor,
        renderer: Arc<dyn PageRenderer>,
    ) -> Result<Self, ProcessingError> {
        let fetcher = PageFetcher::new(&config)?;
        Ok(Self {
            inner: Arc::new(ExtractorInner {
                config,
                ocr,
                renderer,
                structured,
                fetcher,
            }),
        })
    }

    pub fn ocr_engine(&self) -> Option<&OcrEngine> {
        self.inner.ocr.as_ref()
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.inner.fetcher
    }

    /// Extracts on the blocking pool.
    pub async fn extract(
        &self,
        bytes: Vec<u8>,
        evidence_type: EvidenceType,
        options: &ExtractOptions,
    ) -> Result<ExtractedContent, ProcessingError> {
        let extractor = self.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            extractor.extract_blocking(&bytes, evidence_type, &options)
        })
        .await
        .map_err(|e| ProcessingError::TaskAborted(e.to_string()))?
    }

    /// Fetches a page and extracts it as HTML.
    pub async fn extract_url(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> Result<(FetchedPage, ExtractedContent), ProcessingError> {
        let page = self.inner.fetcher.fetch(url).await?;
        let options = options.clone().with_source_url(page.url.clone());
        let content = self
            .extract(page.body.clone(), EvidenceType::Url, &options)
            .await?;
        Ok((page, content))
    }

    pub fn extract_blocking(
        &self,
        bytes: &[u8],
        evidence_type: EvidenceType,
        options: &ExtractOptions,
    ) -> Result<ExtractedContent, ProcessingError> {
        let _span = info_span!("extract", kind = %evidence_type, bytes = bytes.len()).entered();

        let ocr = if options.ocr_enabled {
            self.inner.ocr.as_ref().map(|engine| (engine, &options.ocr))
        } else {
            None
        };

        let mut content = match evidence_type {
            EvidenceType::Csv => {
                let _span = info_span!("extract.csv").entered();
                let (text, table) = csv::parse_csv(bytes)?;
                ExtractedContent {
                    text,
                    tables: vec![table],
                    ..Default::default()
                }
            }
            EvidenceType::Excel => {
                let _span = info_span!("extract.spreadsheet").entered();
                let workbook = spreadsheet::parse_xlsx(bytes)?;
                ExtractedContent {
                    text: workbook.text,
                    tables: workbook.tables,
                    ..Default::default()
                }
            }
            EvidenceType::Pdf => {
                let result = pdf::extract_pdf(
                    bytes,
                    ocr,
                    self.inner.renderer.as_ref(),
                    self.inner.config.sparse_text_threshold,
                    self.inner.config.pdf_render_dpi,
                )?;
                ExtractedContent {
                    text: result.text,
                    ocr: result.ocr,
                    page_count: Some(result.page_count),
                    ..Default::default()
                }
            }
            EvidenceType::Image => {
                let result = image::extract_image(bytes, ocr)?;
                ExtractedContent {
                    text: result.ocr.as_ref().map(|r| r.text.clone()).unwrap_or_default(),
                    images: vec![result.image],
                    ocr: result.ocr,
                    ..Default::default()
                }
            }
            EvidenceType::Url => html_content(&decode_text(bytes), options.source_url.as_deref()),
            EvidenceType::Text => {
                let text = decode_text(bytes);
                if html::looks_like_html(&text) {
                    html_content(&text, options.source_url.as_deref())
                } else {
                    ExtractedContent {
                        text,
                        ..Default::default()
                    }
                }
            }
            EvidenceType::Unknown => {
                return Err(ProcessingError::UnsupportedFormat(
                    "could not determine the document type".to_string(),
                ))
            }
        };

        content.structured_data = self.inner.structured.extract(&content.text);

        tracing::debug!(
            chars = content.text.chars().count(),
            tables = content.tables.len(),
            images = content.images.len(),
            ocr = content.ocr.is_some(),
            "Extraction finished"
        );

        Ok(content)
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string()
}

fn html_content(html: &str, source_url: Option<&str>) -> ExtractedContent {
    let _span = info_span!("extract.html").entered();
    let doc = html::extract_html(html, source_url);
    ExtractedContent {
        text: doc.text,
        tables: doc.tables,
        images: doc.images,
        title: doc.title,
        ..Default::default()
    }
}
