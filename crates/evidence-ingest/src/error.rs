use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation failed: {}", reasons.join("; "))]
    Validation { reasons: Vec<String> },

    #[error("Security check failed: {}", reasons.join("; "))]
    Security { reasons: Vec<String> },

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Evidence not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse CSV: {0}")]
    Csv(String),

    #[error("Failed to process spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("Failed to process PDF: {0}")]
    Pdf(String),

    #[error("Failed to process image: {0}")]
    Image(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("Extraction task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown storage object: {0}")]
    UnknownObject(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error(
        "Daily cost cap exceeded: current {current:.2} + estimated {estimated:.2} > cap {cap:.2}"
    )]
    BudgetExceeded {
        current: f64,
        estimated: f64,
        cap: f64,
    },

    #[error("Estimated cost must be a finite, non-negative number, got {estimated}")]
    InvalidEstimate { estimated: f64 },

    #[error("Job timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Queue has been shut down")]
    ShutDown,

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
