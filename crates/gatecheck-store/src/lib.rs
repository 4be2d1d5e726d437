//! gatecheck-store — Persistent state for the gate scan service.
//!
//! One SQLite database holds the enrollment directory (`registered_students`)
//! and the scan journal (`scan_log`). Index artifacts live as files and can be
//! fetched from remote object storage on first start.

pub mod artifacts;
pub mod directory;
pub mod journal;
pub mod tokens;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use artifacts::{ArtifactError, ArtifactSource};
pub use directory::{SqliteDirectory, StudentRecord};
pub use journal::{JournalEntry, ScanJournal};
pub use tokens::token_digest;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt timestamp in journal: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS registered_students (
    faiss_name_key TEXT PRIMARY KEY NOT NULL,
    student_name   TEXT,
    student_id     TEXT,
    college        TEXT,
    year_level     TEXT
);
CREATE TABLE IF NOT EXISTS scan_log (
    id           TEXT PRIMARY KEY NOT NULL,
    gate         TEXT NOT NULL,
    name         TEXT NOT NULL,
    identity_key TEXT,
    similarity   REAL NOT NULL,
    logged_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS scan_log_logged_at ON scan_log (logged_at);
";

/// Open (creating if needed) the gatecheck database and apply the schema.
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch(SCHEMA)?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");
    Ok(conn)
}

/// Default data directory: `$XDG_DATA_HOME/gatecheck` or `~/.local/share/gatecheck`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("gatecheck")
}

/// Default database path inside [`default_data_dir`].
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("gatecheck.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_database_creates_parent_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/gatecheck.db");
        let conn = open_database(&path).unwrap();
        assert!(path.exists());

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(tables, vec!["registered_students", "scan_log"]);
    }

    #[test]
    fn test_open_database_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatecheck.db");
        drop(open_database(&path).unwrap());
        assert!(open_database(&path).is_ok());
    }
}
