pub mod config;
pub mod db;
pub mod error;
pub mod evidence;
pub mod extract;
pub mod ocr;
pub mod queue;
pub mod sanitize;
pub mod security;
pub mod storage;
pub mod telemetry;
pub mod transform;

pub use config::{load_config, load_config_from_str, IngestConfig};
pub use db::{Database, DatabaseError};
pub use error::{
    ConfigError, IngestError, ProcessingError, QueueError, Result, StorageError,
};
pub use evidence::{
    Evidence, EvidenceOrchestrator, EvidenceSource, EvidenceStatus, EvidenceStore, EvidenceType,
    ReprocessInput, UploadRequest,
};
pub use extract::{ExtractedContent, FormatExtractor};
pub use ocr::{OcrEngine, OcrResult};
pub use queue::{JobPriority, JobRequest, JobStatusView, ProcessingQueue};
pub use security::{SecurityScanResult, SecurityScanner};
pub use storage::StorageOptimizer;
pub use transform::{DataTransformer, TransformedTable};
