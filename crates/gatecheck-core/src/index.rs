//! Nearest-neighbor search over enrolled face embeddings.
//!
//! [`FlatIndex`] is an exact, brute-force squared-L2 index over unit-normalized
//! vectors. It is loaded once at startup from a JSON artifact of the form
//! `{"dimension": 512, "entries": [{"key": "harvey", "vector": [...]}]}`.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index file not found: {0}")]
    NotFound(String),
    #[error("failed to read index: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse index: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("dimension mismatch: index is {expected}-dim, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index entry {0} has an empty identity key")]
    EmptyKey(usize),
    #[error("index entry {0} has a zero or non-finite vector")]
    InvalidVector(usize),
}

/// The single closest index entry to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub identity_key: String,
    /// Squared L2 distance between the (unit) query and the entry.
    pub distance: f32,
}

/// Nearest-neighbor lookup from a query embedding to an enrolled identity key.
pub trait SimilarityIndex: Send + Sync {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the nearest entry (k = 1), or `None` if the index is empty.
    fn search(&self, query: &Embedding) -> Result<Option<Neighbor>, IndexError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    dimension: usize,
    entries: Vec<IndexFileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFileEntry {
    key: String,
    vector: Vec<f32>,
}

/// Exact flat index. Many entries may share one identity key.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    keys: Vec<String>,
    vectors: Vec<Embedding>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            keys: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Add an entry. The vector is L2-normalized on insertion; vectors that
    /// cannot be normalized (zero, NaN, infinite) are rejected.
    pub fn insert(&mut self, key: impl Into<String>, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let key = key.into();
        if key.trim().is_empty() {
            return Err(IndexError::EmptyKey(self.keys.len()));
        }
        let position = self.keys.len();
        if !vector.iter().all(|v| v.is_finite()) {
            return Err(IndexError::InvalidVector(position));
        }
        let embedding = Embedding::normalized(vector);
        if !embedding.is_unit_norm() {
            return Err(IndexError::InvalidVector(position));
        }
        self.keys.push(key);
        self.vectors.push(embedding);
        Ok(())
    }

    /// Parse an index artifact from JSON text.
    pub fn from_json(text: &str) -> Result<Self, IndexError> {
        let file: IndexFile = serde_json::from_str(text)?;
        let mut index = Self::new(file.dimension);
        for entry in file.entries {
            index.insert(entry.key, entry.vector)?;
        }
        Ok(index)
    }

    /// Load an index artifact from disk.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let index = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            dimension = index.dimension,
            entries = index.keys.len(),
            "loaded similarity index"
        );
        Ok(index)
    }

    /// Serialize to the artifact format.
    pub fn to_json(&self) -> Result<String, IndexError> {
        let file = IndexFile {
            dimension: self.dimension,
            entries: self
                .keys
                .iter()
                .zip(self.vectors.iter())
                .map(|(key, v)| IndexFileEntry {
                    key: key.clone(),
                    vector: v.values.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_string(&file)?)
    }
}

impl SimilarityIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn search(&self, query: &Embedding) -> Result<Option<Neighbor>, IndexError> {
        if query.dimension() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.dimension(),
            });
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, vector) in self.vectors.iter().enumerate() {
            let d = query.squared_l2(vector);
            // Strict comparison keeps the earliest entry on ties.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        Ok(best.map(|(i, distance)| Neighbor {
            identity_key: self.keys[i].clone(),
            distance,
        }))
    }
}
