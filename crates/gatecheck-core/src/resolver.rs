//! Detection → identity resolution.
//!
//! Looks up the nearest enrolled embedding, converts the squared L2 distance
//! into cosine similarity, applies the acceptance threshold, and joins the
//! hit against the identity directory.

use crate::directory::{DirectoryError, IdentityDirectory};
use crate::index::{IndexError, SimilarityIndex};
use crate::types::{round_similarity, similarity_from_distance, Detection, MatchOutcome};
use thiserror::Error;

/// Default minimum cosine similarity for a positive match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.50;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("embedding is not unit-normalized (norm {0:.4})")]
    NotNormalized(f32),
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),
}

/// Threshold-based resolver from a detection to a [`MatchOutcome`].
#[derive(Debug, Clone, Copy)]
pub struct MatchResolver {
    threshold: f32,
}

impl Default for MatchResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl MatchResolver {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Resolve one detection.
    ///
    /// The embedding must already be L2-normalized; the distance-to-similarity
    /// conversion is only meaningful on unit vectors. Below-threshold faces
    /// never reach the directory.
    pub fn resolve(
        &self,
        detection: &Detection,
        index: &dyn SimilarityIndex,
        directory: &dyn IdentityDirectory,
    ) -> Result<MatchOutcome, ResolveError> {
        let embedding = &detection.embedding;
        if !embedding.is_unit_norm() {
            return Err(ResolveError::NotNormalized(embedding.norm()));
        }

        let Some(neighbor) = index.search(embedding)? else {
            tracing::debug!("similarity index is empty; reporting unknown");
            return Ok(MatchOutcome::Unknown { similarity: 0.0 });
        };

        let similarity = similarity_from_distance(neighbor.distance);
        let reported = round_similarity(similarity);

        if similarity < self.threshold {
            tracing::debug!(similarity, threshold = self.threshold, "below threshold");
            return Ok(MatchOutcome::Unknown {
                similarity: reported,
            });
        }

        let identity_key = neighbor.identity_key.to_lowercase();
        match directory.lookup(&identity_key)? {
            Some(record) => Ok(MatchOutcome::Matched {
                identity_key,
                display_name: record.display_name.clone(),
                similarity: reported,
                record,
            }),
            None => {
                tracing::warn!(
                    identity_key = %identity_key,
                    "index references a key missing from the directory"
                );
                Ok(MatchOutcome::StaleRecord {
                    identity_key,
                    similarity: reported,
                })
            }
        }
    }
}
