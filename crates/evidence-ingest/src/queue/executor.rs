use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::evidence::EvidenceStore;
use crate::ocr::{OcrEngine, OcrOptions};
use crate::storage::StorageOptimizer;
use crate::transform::DataTransformer;

use super::job::{JobKind, JobOutput};

/// Runs one attempt of a job. Errors are retried by the queue.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobKind) -> Result<JobOutput, QueueError>;
}

/// Executes jobs against the ingestion components.
pub struct PipelineJobExecutor {
    ocr: Option<OcrEngine>,
    ocr_options: OcrOptions,
    batch_concurrency: usize,
    transformer: Arc<DataTransformer>,
    store: Arc<dyn EvidenceStore>,
    storage: StorageOptimizer,
}

impl PipelineJobExecutor {
    pub fn new(
        ocr: Option<OcrEngine>,
        ocr_options: OcrOptions,
        batch_concurrency: usize,
        transformer: Arc<DataTransformer>,
        store: Arc<dyn EvidenceStore>,
        storage: StorageOptimizer,
    ) -> Self {
        Self {
            ocr,
            ocr_options,
            batch_concurrency,
            transformer,
            store,
            storage,
        }
    }
}

fn failed(e: impl std::fmt::Display) -> QueueError {
    QueueError::JobFailed(e.to_string())
}

#[async_trait]
impl JobExecutor for PipelineJobExecutor {
    async fn execute(&self, job: &JobKind) -> Result<JobOutput, QueueError> {
        match job {
            JobKind::Ocr(ocr_job) => {
                let engine = self
                    .ocr
                    .as_ref()
                    .ok_or_else(|| failed("no OCR engine configured"))?;
                let results = engine
                    .recognize_batch(
                        ocr_job.images.clone(),
                        &self.ocr_options,
                        self.batch_concurrency,
                    )
                    .await;
                Ok(JobOutput::Ocr(results))
            }
            JobKind::Transform(transform_job) => {
                let evidence = self
                    .store
                    .find(&transform_job.evidence_id)
                    .map_err(failed)?
                    .ok_or_else(|| {
                        failed(format!("evidence {} not found", transform_job.evidence_id))
                    })?;
                let content = evidence
                    .content
                    .as_ref()
                    .ok_or_else(|| failed(format!("evidence {} has no content", evidence.id)))?;
                let source = evidence
                    .source_url
                    .clone()
                    .unwrap_or_else(|| evidence.original_filename.clone());
                let tables = self
                    .transformer
                    .transform(content, evidence.quality_score(), Some(&source));
                Ok(JobOutput::Transform(tables))
            }
            JobKind::Compress(compress_job) => {
                let storage = self.storage.clone();
                let compress_job = compress_job.clone();
                let result = tokio::task::spawn_blocking(move || {
                    storage.optimize_file(
                        &compress_job.bytes,
                        &compress_job.filename,
                        &compress_job.mime_type,
                    )
                })
                .await
                .map_err(failed)?
                .map_err(failed)?;
                Ok(JobOutput::Compress(result))
            }
            JobKind::Storage(storage_job) => {
                let storage = self.storage.clone();
                let key = storage_job.object_key.clone();
                let object = tokio::task::spawn_blocking(move || storage.migrate_to_archive(&key))
                    .await
                    .map_err(failed)?
                    .map_err(failed)?;
                Ok(JobOutput::Storage(object))
            }
        }
    }
}
