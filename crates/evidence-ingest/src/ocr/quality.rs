//! Post-recognition quality grading.

use serde::{Deserialize, Serialize};

use super::OcrResult;

const LOW_CONFIDENCE: f32 = 50.0;
const MIN_TEXT_CHARS: usize = 10;
const WORD_CONFIDENCE_FLOOR: f32 = 60.0;
const MAX_UNRELIABLE_WORD_SHARE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    LowOverallConfidence,
    VeryShortText,
    ManyLowConfidenceWords,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub kind: QualityIssueKind,
    pub message: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrQualityReport {
    pub level: QualityLevel,
    pub confidence: f32,
    pub issues: Vec<QualityIssue>,
}

impl OcrQualityReport {
    pub fn has_issue(&self, kind: QualityIssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

pub fn evaluate_ocr_quality(result: &OcrResult) -> OcrQualityReport {
    let mut issues = Vec::new();

    if result.confidence < LOW_CONFIDENCE {
        issues.push(QualityIssue {
            kind: QualityIssueKind::LowOverallConfidence,
            message: format!("low overall confidence ({:.0}%)", result.confidence),
            suggestion: "Rescan the document at a higher resolution or with better lighting"
                .to_string(),
        });
    }

    let text_chars = result.text.trim().chars().count();
    if text_chars < MIN_TEXT_CHARS {
        issues.push(QualityIssue {
            kind: QualityIssueKind::VeryShortText,
            message: format!("very short extracted text ({} characters)", text_chars),
            suggestion: "Check that the image contains readable text and is not blank or cropped"
                .to_string(),
        });
    }

    if !result.words.is_empty() {
        let unreliable = result
            .words
            .iter()
            .filter(|w| w.confidence < WORD_CONFIDENCE_FLOOR)
            .count();
        let share = unreliable as f64 / result.words.len() as f64;
        if share > MAX_UNRELIABLE_WORD_SHARE {
            issues.push(QualityIssue {
                kind: QualityIssueKind::ManyLowConfidenceWords,
                message: format!("{:.0}% of words recognized with low confidence", share * 100.0),
                suggestion: "Verify figures manually or enable image preprocessing".to_string(),
            });
        }
    }

    let level = if result.confidence > 80.0 && issues.is_empty() {
        QualityLevel::High
    } else if result.confidence > 60.0 && issues.len() < 2 {
        QualityLevel::Medium
    } else {
        QualityLevel::Low
    };

    OcrQualityReport {
        level,
        confidence: result.confidence,
        issues,
    }
}
