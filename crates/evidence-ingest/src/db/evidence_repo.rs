//! Evidence repository: CRUD operations for the `evidence` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::evidence::{Evidence, EvidenceStore};

/// A raw evidence row. JSON columns are kept as text.
#[derive(Debug, Clone)]
pub struct EvidenceRow {
    pub id: String,
    pub evidence_type: String,
    pub source: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub source_url: Option<String>,
    pub content: Option<String>,
    pub metadata: String,
    pub status: String,
    pub security_scan: Option<String>,
    pub error: Option<String>,
    pub previous_attempt_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl EvidenceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            evidence_type: row.get("evidence_type")?,
            source: row.get("source")?,
            original_filename: row.get("original_filename")?,
            mime_type: row.get("mime_type")?,
            size_bytes: row.get("size_bytes")?,
            source_url: row.get("source_url")?,
            content: row.get("content")?,
            metadata: row.get("metadata")?,
            status: row.get("status")?,
            security_scan: row.get("security_scan")?,
            error: row.get("error")?,
            previous_attempt_id: row.get("previous_attempt_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_evidence(evidence: &Evidence) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: evidence.id.clone(),
            evidence_type: evidence.evidence_type.as_str().to_string(),
            source: evidence.source.as_str().to_string(),
            original_filename: evidence.original_filename.clone(),
            mime_type: evidence.mime_type.clone(),
            size_bytes: evidence.size_bytes as i64,
            source_url: evidence.source_url.clone(),
            content: evidence
                .content
                .as_ref()
                .map(|c| to_json("content", c))
                .transpose()?,
            metadata: to_json("metadata", &evidence.metadata)?,
            status: evidence.status.as_str().to_string(),
            security_scan: evidence
                .security_scan
                .as_ref()
                .map(|s| to_json("security_scan", s))
                .transpose()?,
            error: evidence.error.clone(),
            previous_attempt_id: evidence.previous_attempt_id.clone(),
            created_at: evidence.created_at.to_rfc3339(),
            updated_at: evidence.updated_at.to_rfc3339(),
        })
    }

    pub fn into_evidence(self) -> Result<Evidence, DatabaseError> {
        Ok(Evidence {
            evidence_type: parse_enum("evidence_type", &self.evidence_type)?,
            source: parse_enum("source", &self.source)?,
            status: parse_enum("status", &self.status)?,
            content: self
                .content
                .as_deref()
                .map(|c| from_json("content", c))
                .transpose()?,
            metadata: from_json("metadata", &self.metadata)?,
            security_scan: self
                .security_scan
                .as_deref()
                .map(|s| from_json("security_scan", s))
                .transpose()?,
            created_at: parse_time("created_at", &self.created_at)?,
            updated_at: parse_time("updated_at", &self.updated_at)?,
            size_bytes: self.size_bytes.max(0) as u64,
            id: self.id,
            original_filename: self.original_filename,
            mime_type: self.mime_type,
            source_url: self.source_url,
            error: self.error,
            previous_attempt_id: self.previous_attempt_id,
        })
    }
}

fn to_json<T: Serialize>(column: &'static str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|source| DatabaseError::Json { column, source })
}

fn from_json<T: DeserializeOwned>(column: &'static str, value: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(value).map_err(|source| DatabaseError::Json { column, source })
}

fn parse_enum<T>(column: &'static str, value: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|reason| DatabaseError::InvalidValue { column, reason })
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidValue {
            column,
            reason: e.to_string(),
        })
}

pub fn insert(db: &Database, row: &EvidenceRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO evidence (id, evidence_type, source, original_filename, mime_type,
             size_bytes, source_url, content, metadata, status, security_scan, error,
             previous_attempt_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                row.id,
                row.evidence_type,
                row.source,
                row.original_filename,
                row.mime_type,
                row.size_bytes,
                row.source_url,
                row.content,
                row.metadata,
                row.status,
                row.security_scan,
                row.error,
                row.previous_attempt_id,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites every column except `id` and `created_at`. Returns the number
/// of rows changed.
pub fn update(db: &Database, row: &EvidenceRow) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE evidence SET evidence_type=?2, source=?3, original_filename=?4,
             mime_type=?5, size_bytes=?6, source_url=?7, content=?8, metadata=?9, status=?10,
             security_scan=?11, error=?12, previous_attempt_id=?13, updated_at=?14
             WHERE id=?1",
            params![
                row.id,
                row.evidence_type,
                row.source,
                row.original_filename,
                row.mime_type,
                row.size_bytes,
                row.source_url,
                row.content,
                row.metadata,
                row.status,
                row.security_scan,
                row.error,
                row.previous_attempt_id,
                row.updated_at,
            ],
        )?;
        Ok(changed)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<EvidenceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM evidence WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], EvidenceRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

pub fn find_by_previous_attempt(
    db: &Database,
    previous_id: &str,
) -> Result<Vec<EvidenceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM evidence WHERE previous_attempt_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![previous_id], EvidenceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM evidence WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}

/// Counts rows per status, for reporting.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM evidence GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

impl EvidenceStore for Database {
    fn create(&self, evidence: &Evidence) -> crate::error::Result<()> {
        insert(self, &EvidenceRow::from_evidence(evidence)?)?;
        Ok(())
    }

    fn find(&self, id: &str) -> crate::error::Result<Option<Evidence>> {
        Ok(find_by_id(self, id)?
            .map(EvidenceRow::into_evidence)
            .transpose()?)
    }

    fn update(&self, evidence: &Evidence) -> crate::error::Result<()> {
        let changed = update(self, &EvidenceRow::from_evidence(evidence)?)?;
        if changed == 0 {
            return Err(crate::error::IngestError::NotFound(evidence.id.clone()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> crate::error::Result<bool> {
        Ok(delete(self, id)?)
    }

    fn list_attempts(&self, id: &str) -> crate::error::Result<Vec<Evidence>> {
        let attempts = find_by_previous_attempt(self, id)?
            .into_iter()
            .map(EvidenceRow::into_evidence)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attempts)
    }
}
