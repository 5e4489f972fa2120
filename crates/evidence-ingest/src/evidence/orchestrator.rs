use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::Url;
use tracing::{info, info_span, warn, Instrument};

use crate::config::IngestConfig;
use crate::error::{IngestError, ProcessingError, Result};
use crate::extract::{ExtractOptions, ExtractedContent, FormatExtractor, StructuredExtractor};
use crate::ocr::{evaluate_ocr_quality, infer_language, OcrEngine, OcrOptions, QualityLevel};
use crate::queue::{JobRequest, PipelineJobExecutor, ProcessingQueue};
use crate::sanitize::{redact_filename, redact_url};
use crate::security::{ScanOptions, SecurityScanResult, SecurityScanner};
use crate::storage::{sha256_hex, StorageOptimizer};
use crate::transform::{DataTransformer, TransformedTable};

use super::{Evidence, EvidenceSource, EvidenceStatus, EvidenceStore, EvidenceType, UploadRequest};

/// What a new attempt is built from.
#[derive(Debug, Clone)]
pub enum ReprocessInput {
    /// Refetch URL evidence from its recorded address.
    Refetch,
    /// Fresh bytes for an uploaded file. URL evidence ignores them and
    /// refetches.
    Bytes(Vec<u8>),
}

/// Drives scan, extraction and persistence for each submission, and hands
/// deferred work to the processing queue.
#[derive(Clone)]
pub struct EvidenceOrchestrator {
    scanner: Arc<SecurityScanner>,
    extractor: FormatExtractor,
    transformer: Arc<DataTransformer>,
    store: Arc<dyn EvidenceStore>,
    storage: StorageOptimizer,
    queue: ProcessingQueue,
    extract_options: ExtractOptions,
}

impl EvidenceOrchestrator {
    pub fn new(
        scanner: Arc<SecurityScanner>,
        extractor: FormatExtractor,
        transformer: Arc<DataTransformer>,
        store: Arc<dyn EvidenceStore>,
        storage: StorageOptimizer,
        queue: ProcessingQueue,
        extract_options: ExtractOptions,
    ) -> Self {
        Self {
            scanner,
            extractor,
            transformer,
            store,
            storage,
            queue,
            extract_options,
        }
    }

    /// Wires every component from configuration and starts the queue, so it
    /// must be called from within a tokio runtime.
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn EvidenceStore>,
        ocr: Option<OcrEngine>,
    ) -> Result<Self> {
        let scanner = Arc::new(SecurityScanner::new(config.security.clone()));
        let extractor = FormatExtractor::new(
            config.extraction.clone(),
            ocr.clone(),
            StructuredExtractor::new(config.transform.context_chars),
        )?;
        let transformer = Arc::new(DataTransformer::new(&config.transform));
        let storage = StorageOptimizer::new(config.storage.clone())?;

        let executor = PipelineJobExecutor::new(
            ocr,
            OcrOptions::from_config(&config.ocr),
            config.ocr.batch_concurrency,
            Arc::clone(&transformer),
            Arc::clone(&store),
            storage.clone(),
        );
        let queue = ProcessingQueue::start(config.queue.clone(), Arc::new(executor));

        Ok(Self::new(
            scanner,
            extractor,
            transformer,
            store,
            storage,
            queue,
            ExtractOptions::from_config(&config.extraction, &config.ocr),
        ))
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    pub fn storage(&self) -> &StorageOptimizer {
        &self.storage
    }

    /// Ingests an uploaded file.
    ///
    /// Uploads that fail validation or security checks are rejected without
    /// a record. Extraction failures are recorded as a FAILED attempt and
    /// then returned.
    pub async fn submit_upload(&self, request: UploadRequest) -> Result<Evidence> {
        let span = info_span!(
            "orchestrator.submit",
            source = EvidenceSource::Upload.as_str(),
            file = %redact_filename(&request.filename),
            size = request.bytes.len(),
        );
        self.ingest_upload(request, None).instrument(span).await
    }

    /// Fetches a web page and ingests it as URL evidence.
    pub async fn submit_url(&self, url: &str) -> Result<Evidence> {
        let span = info_span!(
            "orchestrator.submit",
            source = EvidenceSource::UrlFetch.as_str(),
            url = %redact_url(url),
        );
        self.ingest_url(url, None).instrument(span).await
    }

    pub fn get(&self, evidence_id: &str) -> Result<Evidence> {
        self.store
            .find(evidence_id)?
            .ok_or_else(|| IngestError::NotFound(evidence_id.to_string()))
    }

    /// Later attempts of `evidence_id`, oldest first.
    pub fn attempts(&self, evidence_id: &str) -> Result<Vec<Evidence>> {
        self.store.list_attempts(evidence_id)
    }

    /// Builds the annotated tables for completed evidence.
    pub fn transform(&self, evidence_id: &str) -> Result<Vec<TransformedTable>> {
        let evidence = self.get(evidence_id)?;
        let content = match (&evidence.status, &evidence.content) {
            (EvidenceStatus::Completed, Some(content)) => content,
            _ => {
                return Err(IngestError::Validation {
                    reasons: vec![format!(
                        "evidence {} has no extracted content (status {})",
                        evidence.id,
                        evidence.status.as_str()
                    )],
                })
            }
        };

        let _span = info_span!("orchestrator.transform", evidence_id = %evidence.id).entered();
        let source = evidence
            .source_url
            .clone()
            .unwrap_or_else(|| evidence.original_filename.clone());
        let tables = self
            .transformer
            .transform(content, evidence.quality_score(), Some(&source));
        info!(tables = tables.len(), "Transformed evidence");
        Ok(tables)
    }

    /// Runs a new attempt for existing evidence. The new record points back
    /// at `evidence_id`; the earlier record is left as it was.
    pub async fn reprocess(&self, evidence_id: &str, input: ReprocessInput) -> Result<Evidence> {
        let previous = self.get(evidence_id)?;
        let span = info_span!(
            "orchestrator.reprocess",
            previous = %previous.id,
            source = previous.source.as_str(),
        );

        match previous.source {
            EvidenceSource::UrlFetch => {
                let url = previous.source_url.clone().ok_or_else(|| IngestError::Validation {
                    reasons: vec![format!("evidence {} has no source URL", previous.id)],
                })?;
                self.ingest_url(&url, Some(previous.id))
                    .instrument(span)
                    .await
            }
            EvidenceSource::Upload => {
                let ReprocessInput::Bytes(bytes) = input else {
                    return Err(IngestError::Validation {
                        reasons: vec![format!(
                            "reprocessing upload {} requires the file contents",
                            previous.id
                        )],
                    });
                };
                let request =
                    UploadRequest::new(bytes, previous.original_filename, previous.mime_type);
                self.ingest_upload(request, Some(previous.id))
                    .instrument(span)
                    .await
            }
        }
    }

    pub fn delete(&self, evidence_id: &str) -> Result<()> {
        if !self.store.delete(evidence_id)? {
            return Err(IngestError::NotFound(evidence_id.to_string()));
        }
        info!(evidence_id, "Deleted evidence");
        Ok(())
    }

    /// Hands deferred work to the queue and returns the job id.
    pub fn schedule(&self, request: JobRequest) -> Result<String> {
        Ok(self.queue.submit(request)?)
    }

    async fn ingest_upload(
        &self,
        request: UploadRequest,
        previous_attempt_id: Option<String>,
    ) -> Result<Evidence> {
        let started = Instant::now();
        let UploadRequest {
            bytes,
            filename,
            mime_type,
        } = request;

        let scan = self
            .scanner
            .scan(&bytes, &filename, &mime_type, &ScanOptions::default())
            .await;
        reject_unsafe(&scan)?;

        let evidence_type = EvidenceType::detect(&filename, &mime_type);
        let mut evidence = Evidence::pending(
            evidence_type,
            EvidenceSource::Upload,
            &filename,
            &mime_type,
            bytes.len() as u64,
        );
        evidence.previous_attempt_id = previous_attempt_id;
        evidence.security_scan = Some(scan);
        evidence.metadata.checksum = sha256_hex(&bytes);
        self.store.create(&evidence)?;

        let result = self
            .extractor
            .extract(bytes, evidence_type, &self.extract_options)
            .await;
        self.settle(evidence, result, started)
    }

    async fn ingest_url(&self, url: &str, previous_attempt_id: Option<String>) -> Result<Evidence> {
        let started = Instant::now();

        let page = match self.extractor.fetcher().fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                let mut evidence = Evidence::pending(
                    EvidenceType::Url,
                    EvidenceSource::UrlFetch,
                    &page_filename(url),
                    "text/html",
                    0,
                );
                evidence.source_url = Some(url.to_string());
                evidence.previous_attempt_id = previous_attempt_id;
                self.store.create(&evidence)?;
                return self.settle(evidence, Err(e), started);
            }
        };

        let filename = page_filename(&page.url);
        let mime_type = page.mime_type();
        let scan_options = ScanOptions {
            skip_content_heuristics: true,
            ..Default::default()
        };
        let scan = self
            .scanner
            .scan(&page.body, &filename, &mime_type, &scan_options)
            .await;
        reject_unsafe(&scan)?;

        let mut evidence = Evidence::pending(
            EvidenceType::Url,
            EvidenceSource::UrlFetch,
            &filename,
            &mime_type,
            page.body.len() as u64,
        );
        evidence.source_url = Some(page.url.clone());
        evidence.previous_attempt_id = previous_attempt_id;
        evidence.security_scan = Some(scan);
        evidence.metadata.checksum = sha256_hex(&page.body);
        self.store.create(&evidence)?;

        let options = self.extract_options.clone().with_source_url(page.url.clone());
        let result = self
            .extractor
            .extract(page.body, EvidenceType::Url, &options)
            .await;
        self.settle(evidence, result, started)
    }

    /// Moves a PENDING record to its terminal status.
    fn settle(
        &self,
        mut evidence: Evidence,
        result: std::result::Result<ExtractedContent, ProcessingError>,
        started: Instant,
    ) -> Result<Evidence> {
        evidence.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        evidence.updated_at = Utc::now();

        match result {
            Ok(content) => {
                if let Some(ocr) = &content.ocr {
                    let report = evaluate_ocr_quality(ocr);
                    if report.level != QualityLevel::High {
                        for issue in &report.issues {
                            warn!(
                                evidence_id = %evidence.id,
                                level = ?report.level,
                                "{} ({})",
                                issue.message,
                                issue.suggestion
                            );
                        }
                    }
                }
                let language = match &content.ocr {
                    Some(ocr) => ocr.language.clone(),
                    None => infer_language(&content.text).code().to_string(),
                };
                evidence.metadata.language = Some(language);
                evidence.metadata.confidence = content.ocr.as_ref().map(|ocr| ocr.confidence);
                evidence.metadata.page_count = content.page_count;
                evidence.content = Some(content);
                evidence.status = EvidenceStatus::Completed;
                self.store.update(&evidence)?;

                info!(
                    evidence_id = %evidence.id,
                    kind = %evidence.evidence_type,
                    elapsed_ms = evidence.metadata.processing_time_ms,
                    "Evidence completed"
                );
                Ok(evidence)
            }
            Err(e) => {
                evidence.status = EvidenceStatus::Failed;
                evidence.error = Some(e.to_string());
                self.store.update(&evidence)?;

                warn!(evidence_id = %evidence.id, error = %e, "Evidence failed");
                Err(e.into())
            }
        }
    }
}

/// Maps an unsafe scan to the matching rejection. Any security finding
/// outranks validation problems.
fn reject_unsafe(scan: &SecurityScanResult) -> Result<()> {
    if scan.is_safe {
        return Ok(());
    }
    let reasons = scan.reasons();
    warn!(reasons = ?reasons, "Submission rejected");
    if scan.has_security_findings() {
        Err(IngestError::Security { reasons })
    } else {
        Err(IngestError::Validation { reasons })
    }
}

/// Name recorded for a fetched page: the last path segment when it looks
/// like a file, otherwise `index.html`.
fn page_filename(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| segment.contains('.'))
        .unwrap_or_else(|| "index.html".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_filename() {
        assert_eq!(page_filename("https://example.com/"), "index.html");
        assert_eq!(page_filename("https://example.com/market"), "index.html");
        assert_eq!(
            page_filename("https://example.com/reports/2024.html?x=1"),
            "2024.html"
        );
        assert_eq!(page_filename("not a url"), "index.html");
    }

    #[test]
    fn test_reject_unsafe_prefers_security() {
        use crate::security::{FailedCheck, ScanMode};

        let mut scan = SecurityScanResult {
            is_safe: false,
            file_signature_valid: true,
            detected_signature: None,
            virus_signatures: None,
            malware_signatures: None,
            suspicious_patterns: Vec::new(),
            failed_checks: vec![FailedCheck::SizeExceeded { size: 20, limit: 10 }],
            scan_mode: ScanMode::HeuristicOnly,
            degraded_reason: None,
            engine: "heuristic".to_string(),
            completed_at: Utc::now(),
        };
        assert!(matches!(
            reject_unsafe(&scan),
            Err(IngestError::Validation { reasons }) if reasons.len() == 1
        ));

        scan.failed_checks.push(FailedCheck::MalwareDetected {
            signatures: vec!["eval".to_string()],
        });
        assert!(matches!(
            reject_unsafe(&scan),
            Err(IngestError::Security { reasons }) if reasons.len() == 2
        ));

        scan.is_safe = true;
        scan.failed_checks.clear();
        assert!(reject_unsafe(&scan).is_ok());
    }
}
