use std::io::Cursor;

use image::ImageReader;
use tracing::info_span;

use crate::error::ProcessingError;
use crate::ocr::{OcrEngine, OcrOptions, OcrResult};

use super::ProcessedImage;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageExtraction {
    pub image: ProcessedImage,
    pub ocr: Option<OcrResult>,
}

/// Reads the dimensions from the image header without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), ProcessingError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ProcessingError::Image(format!("Failed to read image header: {}", e)))?
        .into_dimensions()
        .map_err(|e| ProcessingError::Image(format!("Failed to read image dimensions: {}", e)))
}

/// Records the dimensions and, when an engine is given, the recognized text.
pub fn extract_image(
    bytes: &[u8],
    ocr: Option<(&OcrEngine, &OcrOptions)>,
) -> Result<ImageExtraction, ProcessingError> {
    let _span = info_span!("extract.image", bytes = bytes.len()).entered();

    let (width, height) = image_dimensions(bytes)?;

    let ocr = match ocr {
        Some((engine, options)) => Some(engine.recognize_blocking(bytes, options)?),
        None => None,
    };

    Ok(ImageExtraction {
        image: ProcessedImage {
            url: None,
            alt: None,
            width: Some(width),
            height: Some(height),
            ocr_text: ocr.as_ref().map(|r| r.text.clone()),
        },
        ocr,
    })
}
