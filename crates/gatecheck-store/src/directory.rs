//! SQLite-backed enrollment directory.

use crate::{open_database, StoreError};
use gatecheck_core::directory::{DirectoryError, IdentityDirectory};
use gatecheck_core::types::EnrollmentRecord;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// A `registered_students` row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRecord {
    /// Lowercase key shared with the similarity index.
    pub faiss_name_key: String,
    pub student_name: Option<String>,
    pub student_id: Option<String>,
    pub college: Option<String>,
    pub year_level: Option<String>,
}

impl StudentRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            faiss_name_key: row.get(0)?,
            student_name: row.get(1)?,
            student_id: row.get(2)?,
            college: row.get(3)?,
            year_level: row.get(4)?,
        })
    }

    /// Convert to the directory's view. A missing name falls back to the key.
    pub fn into_enrollment(self) -> EnrollmentRecord {
        let display_name = self
            .student_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.faiss_name_key.clone());
        EnrollmentRecord {
            identity_key: self.faiss_name_key,
            display_name,
            student_id: self.student_id,
            college: self.college,
            year_level: self.year_level,
        }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT faiss_name_key, student_name, student_id, college, year_level FROM registered_students";

pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    /// Wrap a connection that already carries the schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert or replace a record. The key is stored lowercase.
    pub fn upsert(&self, record: &StudentRecord) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO registered_students
                 (faiss_name_key, student_name, student_id, college, year_level)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(faiss_name_key) DO UPDATE SET
                 student_name = excluded.student_name,
                 student_id   = excluded.student_id,
                 college      = excluded.college,
                 year_level   = excluded.year_level",
            params![
                record.faiss_name_key.to_lowercase(),
                record.student_name,
                record.student_id,
                record.college,
                record.year_level,
            ],
        )?;
        Ok(())
    }

    /// Remove a record. Returns whether a row was deleted.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let n = self.conn().execute(
            "DELETE FROM registered_students WHERE faiss_name_key = ?1",
            params![key.to_lowercase()],
        )?;
        Ok(n > 0)
    }

    pub fn get(&self, key: &str) -> Result<Option<StudentRecord>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE faiss_name_key = ?1");
        let record = self
            .conn()
            .query_row(&sql, params![key.to_lowercase()], StudentRecord::from_row)
            .optional()?;
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY faiss_name_key"))?;
        let rows = stmt.query_map([], StudentRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM registered_students", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

impl IdentityDirectory for SqliteDirectory {
    fn lookup(&self, identity_key: &str) -> Result<Option<EnrollmentRecord>, DirectoryError> {
        self.get(identity_key)
            .map(|r| r.map(StudentRecord::into_enrollment))
            .map_err(|e| DirectoryError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(key: &str, name: Option<&str>) -> StudentRecord {
        StudentRecord {
            faiss_name_key: key.into(),
            student_name: name.map(String::from),
            student_id: Some("TUPM-21-0001".into()),
            college: Some("COE".into()),
            year_level: None,
        }
    }

    fn open_temp() -> (tempfile::TempDir, SqliteDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDirectory::open(&dir.path().join("gatecheck.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_upsert_and_lookup() {
        let (_tmp, db) = open_temp();
        db.upsert(&student("Harvey", Some("Harvey Dent"))).unwrap();

        let rec = db.lookup("harvey").unwrap().unwrap();
        assert_eq!(rec.identity_key, "harvey");
        assert_eq!(rec.display_name, "Harvey Dent");
        assert_eq!(rec.college.as_deref(), Some("COE"));
        assert_eq!(rec.year_level, None);
    }

    #[test]
    fn test_upsert_replaces() {
        let (_tmp, db) = open_temp();
        db.upsert(&student("harvey", Some("Harvey"))).unwrap();
        db.upsert(&student("harvey", Some("Harvey Dent"))).unwrap();
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(
            db.get("harvey").unwrap().unwrap().student_name.as_deref(),
            Some("Harvey Dent")
        );
    }

    #[test]
    fn test_missing_name_falls_back_to_key() {
        let (_tmp, db) = open_temp();
        db.upsert(&student("selina", None)).unwrap();
        assert_eq!(db.lookup("selina").unwrap().unwrap().display_name, "selina");
    }

    #[test]
    fn test_lookup_absent_and_remove() {
        let (_tmp, db) = open_temp();
        assert!(db.lookup("nobody").unwrap().is_none());

        db.upsert(&student("bruce", Some("Bruce Wayne"))).unwrap();
        assert!(db.remove("BRUCE").unwrap());
        assert!(!db.remove("bruce").unwrap());
        assert!(db.lookup("bruce").unwrap().is_none());
    }

    #[test]
    fn test_list_sorted() {
        let (_tmp, db) = open_temp();
        db.upsert(&student("zed", None)).unwrap();
        db.upsert(&student("amy", None)).unwrap();
        let keys: Vec<_> = db.list().unwrap().into_iter().map(|r| r.faiss_name_key).collect();
        assert_eq!(keys, vec!["amy", "zed"]);
    }
}
