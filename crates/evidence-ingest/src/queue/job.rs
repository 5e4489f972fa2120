use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ocr::OcrResult;
use crate::storage::{OptimizationResult, StoredObject};
use crate::transform::TransformedTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl JobPriority {
    /// Lower runs first.
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::High => 0,
            JobPriority::Medium => 1,
            JobPriority::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Ocr,
    Transform,
    Compress,
    Storage,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Ocr => "ocr",
            JobType::Transform => "transform",
            JobType::Compress => "compress",
            JobType::Storage => "storage",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognize a batch of images.
#[derive(Debug, Clone, Default)]
pub struct OcrJob {
    pub evidence_id: Option<String>,
    pub images: Vec<Vec<u8>>,
}

impl OcrJob {
    pub fn payload_bytes(&self) -> u64 {
        self.images.iter().map(|i| i.len() as u64).sum()
    }
}

/// Build the annotated tables for a stored evidence record.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub evidence_id: String,
    /// Used for the admission estimate; the charge uses the real count.
    pub expected_tables: usize,
}

/// Deduplicate, recompress and store a file.
#[derive(Debug, Clone)]
pub struct CompressJob {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// Move a stored object into the archive tier.
#[derive(Debug, Clone)]
pub struct StorageJob {
    pub object_key: String,
    pub size_bytes: u64,
    /// Expected residence in the archive, for costing.
    pub retention_days: f64,
}

#[derive(Debug, Clone)]
pub enum JobKind {
    Ocr(OcrJob),
    Transform(TransformJob),
    Compress(CompressJob),
    Storage(StorageJob),
}

impl JobKind {
    pub fn job_type(&self) -> JobType {
        match self {
            JobKind::Ocr(_) => JobType::Ocr,
            JobKind::Transform(_) => JobType::Transform,
            JobKind::Compress(_) => JobType::Compress,
            JobKind::Storage(_) => JobType::Storage,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobOutput {
    Ocr(Vec<OcrResult>),
    Transform(Vec<TransformedTable>),
    Compress(OptimizationResult),
    Storage(StoredObject),
}

/// What a caller hands to [`super::ProcessingQueue::submit`]. Unset fields
/// take the queue's configured defaults.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub kind: JobKind,
    pub priority: JobPriority,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub estimated_cost: Option<f64>,
}

impl JobRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            priority: JobPriority::default(),
            max_retries: None,
            timeout: None,
            estimated_cost: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }
}

/// A queued unit of work. Callers only ever see clones.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub id: String,
    pub kind: Arc<JobKind>,
    pub priority: JobPriority,
    pub retries: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub failed: bool,
    pub output: Option<JobOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
}

impl ProcessingJob {
    pub fn job_type(&self) -> JobType {
        self.kind.job_type()
    }

    /// Derived from the timestamps alone.
    pub fn state(&self) -> JobState {
        if self.completed_at.is_some() {
            JobState::Completed
        } else if self.started_at.is_some() {
            JobState::Running
        } else {
            JobState::Pending
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn view(&self, now: DateTime<Utc>) -> JobStatusView {
        let state = self.state();
        let queue_time_ms = (self.started_at.unwrap_or(now) - self.created_at)
            .num_milliseconds()
            .max(0);
        let processing_time_ms = self.started_at.map(|started| {
            (self.completed_at.unwrap_or(now) - started)
                .num_milliseconds()
                .max(0)
        });

        JobStatusView {
            id: self.id.clone(),
            job_type: self.job_type(),
            priority: self.priority,
            status: state,
            progress: match state {
                JobState::Pending => 0,
                JobState::Running => 50,
                JobState::Completed => 100,
            },
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
            estimated_cost: self.estimated_cost,
            actual_cost: self.actual_cost,
            queue_time_ms,
            processing_time_ms,
        }
    }
}

/// Read-only job snapshot for status polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub queue_time_ms: i64,
    pub processing_time_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ProcessingJob {
        ProcessingJob {
            id: "job-1".to_string(),
            kind: Arc::new(JobKind::Ocr(OcrJob::default())),
            priority: JobPriority::High,
            retries: 0,
            max_retries: 3,
            timeout: Duration::from_secs(5),
            estimated_cost: 1.5,
            actual_cost: None,
            created_at: Utc::now() - chrono::Duration::seconds(10),
            started_at: None,
            completed_at: None,
            error: None,
            failed: false,
            output: None,
        }
    }

    #[test]
    fn test_state_follows_timestamps() {
        let mut job = job();
        assert_eq!(job.state(), JobState::Pending);
        assert_eq!(job.view(Utc::now()).progress, 0);

        job.started_at = Some(job.created_at + chrono::Duration::seconds(4));
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.view(Utc::now()).progress, 50);

        job.completed_at = Some(job.created_at + chrono::Duration::seconds(7));
        let view = job.view(Utc::now());
        assert_eq!(view.status, JobState::Completed);
        assert_eq!(view.progress, 100);
        assert_eq!(view.queue_time_ms, 4_000);
        assert_eq!(view.processing_time_ms, Some(3_000));
    }

    #[test]
    fn test_view_serializes_type_field() {
        let json = serde_json::to_value(job().view(Utc::now())).unwrap();
        assert_eq!(json["type"], "ocr");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["status"], "pending");
        assert!(json["processingTimeMs"].is_null());
    }

    #[test]
    fn test_priority_rank() {
        assert!(JobPriority::High.rank() < JobPriority::Medium.rank());
        assert!(JobPriority::Medium.rank() < JobPriority::Low.rank());
    }

    #[test]
    fn test_request_builder() {
        let request = JobRequest::new(JobKind::Ocr(OcrJob::default()))
            .with_priority(JobPriority::Low)
            .with_max_retries(1)
            .with_estimated_cost(2.0);
        assert_eq!(request.priority, JobPriority::Low);
        assert_eq!(request.max_retries, Some(1));
        assert_eq!(request.estimated_cost, Some(2.0));
        assert!(request.timeout.is_none());
    }
}
