//! Text recognition with preprocessing, language inference and batching.

pub mod language;
pub mod preprocess;
pub mod quality;
pub mod tesseract;

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::config::OcrConfig;
use crate::error::ProcessingError;

pub use language::{infer_language, Language};
pub use quality::{evaluate_ocr_quality, OcrQualityReport, QualityIssueKind, QualityLevel};
pub use tesseract::TesseractRecognizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    /// 0-100.
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// Output of a recognition backend before language inference.
#[derive(Debug, Clone, Default)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: f32,
    pub words: Vec<OcrWord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub text: String,
    /// Mean confidence, 0-100.
    pub confidence: f32,
    pub words: Vec<OcrWord>,
    pub language: String,
    /// Preprocessing was requested but failed; the original image was used.
    pub preprocessing_degraded: bool,
}

impl OcrResult {
    /// Placeholder for a batch item that could not be recognized.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            words: Vec::new(),
            language: Language::Unknown.code().to_string(),
            preprocessing_degraded: false,
        }
    }

    /// Confidence scaled to 0-1.
    pub fn quality_score(&self) -> f64 {
        (self.confidence as f64 / 100.0).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub languages: Vec<String>,
    pub preprocess: bool,
}

impl OcrOptions {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            languages: config.languages.clone(),
            preprocess: config.preprocess,
        }
    }

    fn language_spec(&self) -> String {
        if self.languages.is_empty() {
            "eng".to_string()
        } else {
            self.languages.join("+")
        }
    }
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self::from_config(&OcrConfig::default())
    }
}

/// A text recognition backend.
///
/// Implementations are blocking; [`OcrEngine`] moves calls onto the
/// blocking pool when driven from async code.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// `languages` uses Tesseract's `eng+jpn` notation.
    fn recognize(&self, image: &[u8], languages: &str) -> Result<RawRecognition, ProcessingError>;
}

/// Returns the same text for every image. Useful when no OCR backend is
/// installed and in tests.
#[derive(Debug, Clone)]
pub struct FixedRecognizer {
    pub text: String,
    pub confidence: f32,
}

impl FixedRecognizer {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
        }
    }
}

impl TextRecognizer for FixedRecognizer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn recognize(
        &self,
        _image: &[u8],
        _languages: &str,
    ) -> Result<RawRecognition, ProcessingError> {
        let words = self
            .text
            .split_whitespace()
            .map(|w| OcrWord {
                text: w.to_string(),
                confidence: self.confidence,
                bbox: None,
            })
            .collect();
        Ok(RawRecognition {
            text: self.text.clone(),
            confidence: self.confidence,
            words,
        })
    }
}

#[derive(Clone)]
pub struct OcrEngine {
    inner: Arc<OcrEngineInner>,
}

struct OcrEngineInner {
    recognizer: Arc<dyn TextRecognizer>,
    max_dimension: u32,
}

impl OcrEngine {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, max_dimension: u32) -> Self {
        Self {
            inner: Arc::new(OcrEngineInner {
                recognizer,
                max_dimension,
            }),
        }
    }

    pub fn tesseract(config: &OcrConfig) -> Self {
        Self::new(Arc::new(TesseractRecognizer::new()), config.max_dimension)
    }

    pub fn recognizer_name(&self) -> &str {
        self.inner.recognizer.name()
    }

    /// Blocking recognition. Call from a blocking context.
    pub fn recognize_blocking(
        &self,
        image: &[u8],
        options: &OcrOptions,
    ) -> Result<OcrResult, ProcessingError> {
        let _span = info_span!(
            "ocr.recognize",
            engine = self.recognizer_name(),
            bytes = image.len()
        )
        .entered();

        let mut preprocessing_degraded = false;
        let prepared = if options.preprocess {
            match preprocess::preprocess_image(image, self.inner.max_dimension) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!("Preprocessing failed, using original image: {}", e);
                    preprocessing_degraded = true;
                    None
                }
            }
        } else {
            None
        };

        let input = prepared.as_deref().unwrap_or(image);
        let raw = self
            .inner
            .recognizer
            .recognize(input, &options.language_spec())?;

        let language = infer_language(&raw.text).code().to_string();
        tracing::debug!(
            confidence = raw.confidence,
            words = raw.words.len(),
            language = %language,
            "Recognition finished"
        );

        Ok(OcrResult {
            text: raw.text,
            confidence: raw.confidence.clamp(0.0, 100.0),
            words: raw.words,
            language,
            preprocessing_degraded,
        })
    }

    /// Recognizes one image on the blocking pool.
    pub async fn recognize(
        &self,
        image: Vec<u8>,
        options: &OcrOptions,
    ) -> Result<OcrResult, ProcessingError> {
        let engine = self.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || engine.recognize_blocking(&image, &options))
            .await
            .map_err(|e| ProcessingError::TaskAborted(e.to_string()))?
    }

    /// Recognizes `images` with at most `concurrency` in flight. Results are
    /// returned in input order; a failed item becomes [`OcrResult::empty`].
    pub async fn recognize_batch(
        &self,
        images: Vec<Vec<u8>>,
        options: &OcrOptions,
        concurrency: usize,
    ) -> Vec<OcrResult> {
        let total = images.len();
        stream::iter(images.into_iter().enumerate())
            .map(|(index, image)| async move {
                match self.recognize(image, options).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(index, total, "Batch OCR item failed: {}", e);
                        OcrResult::empty()
                    }
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
