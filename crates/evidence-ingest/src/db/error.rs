//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file belongs to another application.
    #[error("Not an evidence database (application id {found:#010x})")]
    ForeignDatabase { found: i64 },

    /// The file was written by a newer release with a later schema.
    #[error("Evidence schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// The evidence schema could not be created.
    #[error("Failed to create evidence schema: {0}")]
    Schema(#[source] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("Failed to encode or decode column '{column}': {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value does not map to a known variant.
    #[error("Invalid value in column '{column}': {reason}")]
    InvalidValue { column: &'static str, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
