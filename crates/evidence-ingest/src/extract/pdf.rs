use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info_span;

use crate::error::ProcessingError;
use crate::ocr::{infer_language, OcrEngine, OcrOptions, OcrResult};

/// Marker lopdf emits for CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

#[derive(Debug, Clone, PartialEq)]
pub struct PdfExtraction {
    pub text: String,
    pub page_count: u32,
    /// Present when OCR output replaced the native text.
    pub ocr: Option<OcrResult>,
}

/// Turns PDF pages into images for OCR.
pub trait PageRenderer: Send + Sync {
    fn page_count(&self, pdf: &[u8]) -> Result<u32, ProcessingError>;

    /// Renders one 1-based page as PNG.
    fn render(&self, pdf: &[u8], page: u32, dpi: u32) -> Result<Vec<u8>, ProcessingError>;
}

/// Renders through poppler-utils (`pdftoppm`, `pdfinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PopplerRenderer;

impl PageRenderer for PopplerRenderer {
    fn page_count(&self, pdf: &[u8]) -> Result<u32, ProcessingError> {
        let input = ScratchFile::write("pagecount", "pdf", pdf)?;

        let output = Command::new("pdfinfo")
            .arg(input.path())
            .output()
            .map_err(|e| {
                ProcessingError::Pdf(format!(
                    "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(ProcessingError::Pdf(format!(
                "pdfinfo failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).unwrap_or(1))
    }

    fn render(&self, pdf: &[u8], page: u32, dpi: u32) -> Result<Vec<u8>, ProcessingError> {
        let input = ScratchFile::write("render", "pdf", pdf)?;
        let prefix = std::env::temp_dir().join(format!("evidence_page_{}", uuid::Uuid::new_v4()));
        // -singlefile writes exactly `<prefix>.png`.
        let rendered = ScratchFile(prefix.with_extension("png"));
        let page = page.to_string();

        let output = Command::new("pdftoppm")
            .args(["-png", "-singlefile", "-r", &dpi.to_string(), "-f", &page, "-l", &page])
            .arg(input.path())
            .arg(&prefix)
            .output()
            .map_err(|e| {
                ProcessingError::Pdf(format!(
                    "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(ProcessingError::Pdf(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        std::fs::read(rendered.path())
            .map_err(|e| ProcessingError::Pdf(format!("Failed to read rendered page: {}", e)))
    }
}

/// A temp file removed on drop.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn write(label: &str, extension: &str, bytes: &[u8]) -> Result<Self, ProcessingError> {
        let path = std::env::temp_dir().join(format!(
            "evidence_{}_{}.{}",
            label,
            uuid::Uuid::new_v4(),
            extension
        ));
        std::fs::write(&path, bytes)
            .map_err(|e| ProcessingError::Pdf(format!("Failed to write temp PDF: {}", e)))?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn parse_pdfinfo_pages(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

/// Native text of every page, in page order.
pub fn extract_native_text(pdf: &[u8]) -> Result<(String, u32), ProcessingError> {
    let doc = lopdf::Document::load_mem(pdf)
        .map_err(|e| ProcessingError::Pdf(format!("Failed to load PDF: {}", e)))?;

    let pages = doc.get_pages();
    let mut text = String::new();
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => tracing::debug!(page = page_num, "No text on page: {}", e),
        }
    }

    Ok((text, pages.len() as u32))
}

/// Characters that carry content: whitespace and undecodable-font markers
/// do not count.
pub fn meaningful_chars(text: &str) -> usize {
    text.replace(IDENTITY_H_PATTERN, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .count()
}

pub fn is_sparse(text: &str, threshold: usize) -> bool {
    meaningful_chars(text) < threshold
}

/// Extracts a PDF, re-reading sparse documents through OCR when an engine
/// is supplied. The longer of the native and OCR text wins.
pub fn extract_pdf(
    pdf: &[u8],
    ocr: Option<(&OcrEngine, &OcrOptions)>,
    renderer: &dyn PageRenderer,
    sparse_threshold: usize,
    dpi: u32,
) -> Result<PdfExtraction, ProcessingError> {
    let _span = info_span!("extract.pdf", bytes = pdf.len()).entered();

    let (native_text, page_count) = match extract_native_text(pdf) {
        Ok(native) => native,
        Err(e) => {
            let detail = match e {
                ProcessingError::Pdf(message) => message,
                other => other.to_string(),
            };
            let Some((engine, options)) = ocr else {
                return Err(ProcessingError::Pdf(format!(
                    "{}. OCR fallback unavailable.",
                    detail
                )));
            };
            tracing::warn!("lopdf could not parse document, falling back to OCR: {}", detail);
            let page_count = renderer.page_count(pdf).map_err(|r| {
                ProcessingError::Pdf(format!("{}. OCR fallback failed: {}", detail, r))
            })?;
            let result = ocr_pages(pdf, page_count, engine, options, renderer, dpi);
            if meaningful_chars(&result.text) == 0 {
                return Err(ProcessingError::Pdf(format!(
                    "{}. OCR fallback recovered no text from {} page(s).",
                    detail, page_count
                )));
            }
            return Ok(PdfExtraction {
                text: result.text.clone(),
                page_count,
                ocr: Some(result),
            });
        }
    };

    if !is_sparse(&native_text, sparse_threshold) {
        return Ok(PdfExtraction {
            text: native_text,
            page_count,
            ocr: None,
        });
    }

    let Some((engine, options)) = ocr else {
        return Ok(PdfExtraction {
            text: native_text,
            page_count,
            ocr: None,
        });
    };

    let _ocr_span = info_span!("extract.pdf_ocr", pages = page_count).entered();
    let result = ocr_pages(pdf, page_count, engine, options, renderer, dpi);
    if meaningful_chars(&result.text) > meaningful_chars(&native_text) {
        Ok(PdfExtraction {
            text: result.text.clone(),
            page_count,
            ocr: Some(result),
        })
    } else {
        tracing::debug!("OCR text was not longer than native text, keeping native");
        Ok(PdfExtraction {
            text: native_text,
            page_count,
            ocr: None,
        })
    }
}

/// OCRs every page and merges the results. Pages that fail to render or
/// recognize are skipped.
fn ocr_pages(
    pdf: &[u8],
    page_count: u32,
    engine: &OcrEngine,
    options: &OcrOptions,
    renderer: &dyn PageRenderer,
    dpi: u32,
) -> OcrResult {
    let mut pages = Vec::new();
    for page in 1..=page_count {
        let image = match renderer.render(pdf, page, dpi) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(page, "Failed to render page: {}", e);
                continue;
            }
        };
        match engine.recognize_blocking(&image, options) {
            Ok(result) => pages.push(result),
            Err(e) => tracing::warn!(page, "OCR failed for page: {}", e),
        }
    }
    merge_page_results(pages)
}

fn merge_page_results(pages: Vec<OcrResult>) -> OcrResult {
    if pages.is_empty() {
        return OcrResult::empty();
    }

    let text = pages
        .iter()
        .map(|p| p.text.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    let scored: Vec<f32> = pages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| p.confidence)
        .collect();
    let confidence = if scored.is_empty() {
        0.0
    } else {
        scored.iter().sum::<f32>() / scored.len() as f32
    };
    let preprocessing_degraded = pages.iter().any(|p| p.preprocessing_degraded);
    let words = pages.into_iter().flat_map(|p| p.words).collect();

    OcrResult {
        language: infer_language(&text).code().to_string(),
        text,
        confidence,
        words,
        preprocessing_degraded,
    }
}
