use std::io::Cursor;

use crate::error::ProcessingError;

use super::{BoundingBox, OcrWord, RawRecognition, TextRecognizer};

/// Tesseract through leptess. A fresh engine is created per call, so one
/// recognizer can serve concurrent batch items.
#[derive(Debug, Clone, Default)]
pub struct TesseractRecognizer {
    data_path: Option<String>,
}

impl TesseractRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_path(mut self, path: impl Into<String>) -> Self {
        self.data_path = Some(path.into());
        self
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &[u8], languages: &str) -> Result<RawRecognition, ProcessingError> {
        let img = image::load_from_memory(image)
            .map_err(|e| ProcessingError::Ocr(format!("Failed to load image: {}", e)))?;

        // leptess reads PNG reliably regardless of the source encoding.
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ProcessingError::Ocr(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(self.data_path.as_deref(), languages).map_err(|e| {
            ProcessingError::Ocr(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessingError::Ocr(format!("Failed to set image for OCR: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ProcessingError::Ocr(format!("OCR failed: {}", e)))?;

        let confidence = lt.mean_text_conf().clamp(0, 100) as f32;

        let words = match lt.get_tsv_text(0) {
            Ok(tsv) => parse_tsv_words(&tsv),
            Err(_) => text
                .split_whitespace()
                .map(|w| OcrWord {
                    text: w.to_string(),
                    confidence,
                    bbox: None,
                })
                .collect(),
        };

        Ok(RawRecognition {
            text,
            confidence,
            words,
        })
    }
}

/// Parses Tesseract TSV output into words.
///
/// Columns: level page block par line word left top width height conf text.
/// Only level-5 rows are words; rows with conf -1 carry no text.
pub fn parse_tsv_words(tsv: &str) -> Vec<OcrWord> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 12 || fields[0] != "5" {
                return None;
            }
            let text = fields[11].trim();
            let confidence: f32 = fields[10].trim().parse().ok()?;
            if text.is_empty() || confidence < 0.0 {
                return None;
            }
            let num = |i: usize| fields[i].trim().parse::<u32>().ok();
            let bbox = match (num(6), num(7), num(8), num(9)) {
                (Some(x), Some(y), Some(width), Some(height)) => Some(BoundingBox {
                    x,
                    y,
                    width,
                    height,
                }),
                _ => None,
            };
            Some(OcrWord {
                text: text.to_string(),
                confidence,
                bbox,
            })
        })
        .collect()
}
