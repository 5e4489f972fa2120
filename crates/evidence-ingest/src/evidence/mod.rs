//! The evidence record and its persistence seam.

pub mod orchestrator;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extract::ExtractedContent;
use crate::security::{normalize_mime, SecurityScanResult, XLSX_MIME, XLS_MIME};

pub use orchestrator::{EvidenceOrchestrator, ReprocessInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceType {
    Csv,
    Excel,
    Pdf,
    Image,
    Url,
    Text,
    Unknown,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Csv => "CSV",
            EvidenceType::Excel => "EXCEL",
            EvidenceType::Pdf => "PDF",
            EvidenceType::Image => "IMAGE",
            EvidenceType::Url => "URL",
            EvidenceType::Text => "TEXT",
            EvidenceType::Unknown => "UNKNOWN",
        }
    }

    /// Detects the type from the MIME type, falling back to the extension.
    pub fn detect(filename: &str, mime_type: &str) -> Self {
        let mime = normalize_mime(mime_type);
        match mime.as_str() {
            "text/csv" => return EvidenceType::Csv,
            XLSX_MIME | XLS_MIME => return EvidenceType::Excel,
            "application/pdf" => return EvidenceType::Pdf,
            "text/plain" | "text/html" => return EvidenceType::Text,
            m if m.starts_with("image/") => return EvidenceType::Image,
            _ => {}
        }

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => EvidenceType::Csv,
            "xlsx" | "xls" => EvidenceType::Excel,
            "pdf" => EvidenceType::Pdf,
            "png" | "jpg" | "jpeg" | "gif" | "webp" => EvidenceType::Image,
            "txt" | "html" | "htm" => EvidenceType::Text,
            _ => EvidenceType::Unknown,
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CSV" => Ok(EvidenceType::Csv),
            "EXCEL" => Ok(EvidenceType::Excel),
            "PDF" => Ok(EvidenceType::Pdf),
            "IMAGE" => Ok(EvidenceType::Image),
            "URL" => Ok(EvidenceType::Url),
            "TEXT" => Ok(EvidenceType::Text),
            "UNKNOWN" => Ok(EvidenceType::Unknown),
            other => Err(format!("unknown evidence type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceSource {
    Upload,
    UrlFetch,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Upload => "UPLOAD",
            EvidenceSource::UrlFetch => "URL_FETCH",
        }
    }
}

impl FromStr for EvidenceSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "UPLOAD" => Ok(EvidenceSource::Upload),
            "URL_FETCH" => Ok(EvidenceSource::UrlFetch),
            other => Err(format!("unknown evidence source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    Pending,
    Completed,
    Failed,
}

impl EvidenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceStatus::Pending => "PENDING",
            EvidenceStatus::Completed => "COMPLETED",
            EvidenceStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EvidenceStatus::Completed | EvidenceStatus::Failed)
    }
}

impl FromStr for EvidenceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EvidenceStatus::Pending),
            "COMPLETED" => Ok(EvidenceStatus::Completed),
            "FAILED" => Ok(EvidenceStatus::Failed),
            other => Err(format!("unknown evidence status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMetadata {
    pub processing_time_ms: u64,
    pub language: Option<String>,
    pub confidence: Option<f32>,
    pub page_count: Option<u32>,
    /// SHA-256 of the submitted bytes, hex encoded.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    pub evidence_type: EvidenceType,
    pub source: EvidenceSource,
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub source_url: Option<String>,
    pub content: Option<ExtractedContent>,
    pub metadata: EvidenceMetadata,
    pub status: EvidenceStatus,
    pub security_scan: Option<SecurityScanResult>,
    pub error: Option<String>,
    /// The attempt this one reprocesses.
    pub previous_attempt_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Evidence {
    /// A new PENDING record with a fresh id.
    pub fn pending(
        evidence_type: EvidenceType,
        source: EvidenceSource,
        original_filename: &str,
        mime_type: &str,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            evidence_type,
            source,
            original_filename: original_filename.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes,
            source_url: None,
            content: None,
            metadata: EvidenceMetadata::default(),
            status: EvidenceStatus::Pending,
            security_scan: None,
            error: None,
            previous_attempt_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// OCR-derived quality in [0, 1]; content without OCR counts as 1.0.
    pub fn quality_score(&self) -> f64 {
        self.content
            .as_ref()
            .and_then(|c| c.ocr.as_ref())
            .map(|ocr| ocr.quality_score())
            .unwrap_or(1.0)
    }
}

/// A single uploaded file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl UploadRequest {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Persistence for evidence records.
pub trait EvidenceStore: Send + Sync {
    fn create(&self, evidence: &Evidence) -> Result<()>;

    fn find(&self, id: &str) -> Result<Option<Evidence>>;

    fn update(&self, evidence: &Evidence) -> Result<()>;

    /// Returns false when no record had that id.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Attempts whose `previous_attempt_id` is `id`, oldest first.
    fn list_attempts(&self, id: &str) -> Result<Vec<Evidence>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_mime() {
        assert_eq!(EvidenceType::detect("a.bin", "text/csv"), EvidenceType::Csv);
        assert_eq!(EvidenceType::detect("a", XLSX_MIME), EvidenceType::Excel);
        assert_eq!(
            EvidenceType::detect("a", "application/pdf; charset=binary"),
            EvidenceType::Pdf
        );
        assert_eq!(EvidenceType::detect("a", "image/webp"), EvidenceType::Image);
        assert_eq!(EvidenceType::detect("page", "text/html"), EvidenceType::Text);
    }

    #[test]
    fn test_detect_falls_back_to_extension() {
        assert_eq!(
            EvidenceType::detect("report.XLSX", "application/octet-stream"),
            EvidenceType::Excel
        );
        assert_eq!(EvidenceType::detect("scan.jpeg", ""), EvidenceType::Image);
        assert_eq!(EvidenceType::detect("archive.7z", ""), EvidenceType::Unknown);
    }

    #[test]
    fn test_enum_text_round_trip() {
        for t in [EvidenceType::Csv, EvidenceType::Url, EvidenceType::Unknown] {
            assert_eq!(t.as_str().parse::<EvidenceType>().unwrap(), t);
        }
        assert_eq!("URL_FETCH".parse::<EvidenceSource>().unwrap(), EvidenceSource::UrlFetch);
        assert!("DONE".parse::<EvidenceStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&EvidenceSource::UrlFetch).unwrap(),
            "\"URL_FETCH\""
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!EvidenceStatus::Pending.is_terminal());
        assert!(EvidenceStatus::Completed.is_terminal());
        assert!(EvidenceStatus::Failed.is_terminal());
    }

    #[test]
    fn test_quality_score_defaults_to_one_without_ocr() {
        let evidence = Evidence::pending(
            EvidenceType::Csv,
            EvidenceSource::Upload,
            "a.csv",
            "text/csv",
            10,
        );
        assert_eq!(evidence.quality_score(), 1.0);
    }
}
