//! The evidence schema and its on-disk markers.
//!
//! A database file is stamped with `application_id` so that pointing the
//! tool at some other SQLite file fails loudly instead of growing an
//! `evidence` table inside it. `user_version` carries the schema revision.

use rusqlite::Connection;

use super::error::DatabaseError;

/// "EVID" in ASCII.
pub const APPLICATION_ID: i64 = 0x4556_4944;

pub const SCHEMA_VERSION: i64 = 1;

const EVIDENCE_SQL: &str = include_str!("evidence.sql");

/// Creates the evidence schema on a fresh file, or checks the markers of an
/// existing one.
pub fn ensure(conn: &Connection) -> Result<(), DatabaseError> {
    let application_id: i64 = conn.query_row("PRAGMA application_id", [], |r| r.get(0))?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    if application_id != 0 && application_id != APPLICATION_ID {
        return Err(DatabaseError::ForeignDatabase {
            found: application_id,
        });
    }
    if version > SCHEMA_VERSION {
        return Err(DatabaseError::SchemaTooNew {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }
    if application_id == APPLICATION_ID && version == SCHEMA_VERSION {
        return Ok(());
    }

    if application_id == 0 && has_user_tables(conn)? {
        return Err(DatabaseError::ForeignDatabase { found: 0 });
    }

    // PRAGMA values cannot be bound as parameters.
    let batch = format!(
        "BEGIN;\n{}\nPRAGMA application_id = {};\nPRAGMA user_version = {};\nCOMMIT;",
        EVIDENCE_SQL, APPLICATION_ID, SCHEMA_VERSION
    );
    if let Err(e) = conn.execute_batch(&batch) {
        let _ = conn.execute_batch("ROLLBACK;");
        return Err(DatabaseError::Schema(e));
    }

    log::info!("Created evidence schema v{}", SCHEMA_VERSION);
    Ok(())
}

fn has_user_tables(conn: &Connection) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma(conn: &Connection, name: &str) -> i64 {
        conn.query_row(&format!("PRAGMA {}", name), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_file_is_stamped() {
        let conn = Connection::open_in_memory().unwrap();
        ensure(&conn).unwrap();

        assert_eq!(pragma(&conn, "application_id"), APPLICATION_ID);
        assert_eq!(pragma(&conn, "user_version"), SCHEMA_VERSION);

        let mut stmt = conn.prepare("PRAGMA table_info(evidence)").unwrap();
        let cols: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        for expected in ["status", "content", "metadata", "security_scan", "previous_attempt_id"] {
            assert!(cols.iter().any(|c| c == expected), "missing column {}", expected);
        }
    }

    #[test]
    fn test_ensure_twice_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        ensure(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO evidence (id, evidence_type, source, original_filename, mime_type,
             metadata, created_at, updated_at)
             VALUES ('e1', 'CSV', 'UPLOAD', 'a.csv', 'text/csv', '{}', 'now', 'now')",
        )
        .unwrap();

        ensure(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM evidence", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_other_application_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA application_id = 1234;").unwrap();

        assert!(matches!(
            ensure(&conn),
            Err(DatabaseError::ForeignDatabase { found: 1234 })
        ));
    }

    #[test]
    fn test_unstamped_file_with_tables_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE jobs (id TEXT PRIMARY KEY);").unwrap();

        assert!(matches!(
            ensure(&conn),
            Err(DatabaseError::ForeignDatabase { found: 0 })
        ));
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        ensure(&conn).unwrap();
        conn.execute_batch("PRAGMA user_version = 7;").unwrap();

        match ensure(&conn) {
            Err(DatabaseError::SchemaTooNew { found, supported }) => {
                assert_eq!(found, 7);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaTooNew, got {:?}", other),
        }
    }
}
