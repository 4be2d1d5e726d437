use crate::types::EnrollmentRecord;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("directory backend error: {0}")]
    Backend(String),
}

/// Lookup from a lowercase identity key to enrollment metadata.
pub trait IdentityDirectory: Send + Sync {
    /// Returns `Ok(None)` when the key is not enrolled.
    fn lookup(&self, identity_key: &str) -> Result<Option<EnrollmentRecord>, DirectoryError>;
}

/// In-memory directory keyed by lowercase identity key.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    records: HashMap<String, EnrollmentRecord>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: EnrollmentRecord) {
        self.records
            .insert(record.identity_key.to_lowercase(), record);
    }

    pub fn remove(&mut self, identity_key: &str) -> Option<EnrollmentRecord> {
        self.records.remove(&identity_key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<EnrollmentRecord> for MemoryDirectory {
    fn from_iter<I: IntoIterator<Item = EnrollmentRecord>>(iter: I) -> Self {
        let mut dir = Self::new();
        for record in iter {
            dir.insert(record);
        }
        dir
    }
}

impl IdentityDirectory for MemoryDirectory {
    fn lookup(&self, identity_key: &str) -> Result<Option<EnrollmentRecord>, DirectoryError> {
        Ok(self.records.get(identity_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> EnrollmentRecord {
        EnrollmentRecord {
            identity_key: key.into(),
            display_name: format!("{key} display"),
            student_id: None,
            college: None,
            year_level: None,
        }
    }

    #[test]
    fn test_insert_lowercases_key() {
        let dir: MemoryDirectory = [record("Harvey")].into_iter().collect();
        assert!(dir.lookup("harvey").unwrap().is_some());
        assert!(dir.lookup("Harvey").unwrap().is_none());
    }

    #[test]
    fn test_remove() {
        let mut dir: MemoryDirectory = [record("a"), record("b")].into_iter().collect();
        assert_eq!(dir.len(), 2);
        assert!(dir.remove("A").is_some());
        assert!(dir.lookup("a").unwrap().is_none());
        assert_eq!(dir.len(), 1);
    }
}
