//! Test harness for isolated ingestion runs.
//!
//! The `TestHarness` struct provides a complete isolated environment:
//! - A temporary storage root for the optimizer
//! - An in-memory SQLite database behind the evidence store
//! - An orchestrator whose OCR engine returns scripted text
//!
//! Construct it inside a tokio runtime; the orchestrator starts its queue.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use evidence_ingest::config::IngestConfig;
use evidence_ingest::db::evidence_repo;
use evidence_ingest::ocr::FixedRecognizer;
use evidence_ingest::queue::ProcessingJob;
use evidence_ingest::{
    Database, Evidence, EvidenceOrchestrator, EvidenceStatus, OcrEngine, Result, UploadRequest,
};

use super::builders::ConfigBuilder;

pub struct TestHarness {
    /// Kept alive for the lifetime of the harness.
    temp_dir: TempDir,
    pub storage_dir: PathBuf,
    pub config: IngestConfig,
    pub database: Database,
    pub orchestrator: EvidenceOrchestrator,
}

impl TestHarness {
    /// Default configuration, OCR returning an empty high-confidence result.
    pub fn new() -> Self {
        Self::with_ocr("", 95.0)
    }

    /// Default configuration with scripted OCR output.
    pub fn with_ocr(text: &str, confidence: f32) -> Self {
        Self::build(|config| config, text, confidence)
    }

    /// Adjusts the default test configuration before wiring.
    pub fn with_config(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        Self::build(configure, "", 95.0)
    }

    pub fn build(
        configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
        ocr_text: &str,
        ocr_confidence: f32,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_dir = temp_dir.path().join("objects");
        let config = configure(ConfigBuilder::new(&storage_dir)).build();

        let database = Database::open_in_memory().expect("Failed to open database");
        let ocr = OcrEngine::new(
            Arc::new(FixedRecognizer::new(ocr_text, ocr_confidence)),
            config.ocr.max_dimension,
        );
        let orchestrator =
            EvidenceOrchestrator::from_config(&config, Arc::new(database.clone()), Some(ocr))
                .expect("Failed to build orchestrator");

        Self {
            temp_dir,
            storage_dir,
            config,
            database,
            orchestrator,
        }
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<Evidence> {
        self.orchestrator
            .submit_upload(UploadRequest::new(bytes, filename, mime_type))
            .await
    }

    /// Number of persisted records with `status`.
    pub fn count(&self, status: EvidenceStatus) -> u64 {
        evidence_repo::count_by_status(&self.database)
            .expect("Failed to count evidence")
            .into_iter()
            .find(|(s, _)| s == status.as_str())
            .map(|(_, n)| n)
            .unwrap_or(0)
    }

    pub fn total_records(&self) -> u64 {
        evidence_repo::count_by_status(&self.database)
            .expect("Failed to count evidence")
            .into_iter()
            .map(|(_, n)| n)
            .sum()
    }

    /// Ids of every record with `status`.
    pub fn ids_with_status(&self, status: EvidenceStatus) -> Vec<String> {
        self.database
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM evidence WHERE status = ?1")?;
                let ids = stmt
                    .query_map([status.as_str()], |r| r.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .expect("Failed to query evidence")
    }

    pub async fn wait_for_job(&self, id: &str) -> ProcessingJob {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.orchestrator
                .queue()
                .wait_for(id, Duration::from_millis(10)),
        )
        .await
        .expect("Job did not finish in time")
        .expect("Job is unknown to the queue")
    }

    pub async fn shutdown(self) {
        self.orchestrator.queue().shutdown().await;
    }
}
