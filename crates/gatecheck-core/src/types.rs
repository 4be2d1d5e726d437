use serde::{Deserialize, Serialize};

/// Display name reported for a face below the similarity threshold.
pub const UNKNOWN_NAME: &str = "Unknown";
/// Display name reported when the index knows a key the directory does not.
pub const STALE_RECORD_NAME: &str = "Stale Record";

const PLACEHOLDER: &str = "N/A";
const ERROR_PLACEHOLDER: &str = "Error";

/// Integer face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from detector float corners, truncating toward zero.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// True when the box has positive width and height.
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Face embedding vector (512-dimensional for the antelopev2 recognizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// Tolerance on `‖v‖ = 1` accepted as unit-normalized.
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

impl Embedding {
    /// Wrap raw values without normalizing them.
    pub fn raw(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// L2-normalize `values`. A zero vector is returned unchanged.
    pub fn normalized(values: Vec<f32>) -> Self {
        let norm = l2_norm(&values);
        let values = if norm > 0.0 {
            values.into_iter().map(|v| v / norm).collect()
        } else {
            values
        };
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    pub fn is_unit_norm(&self) -> bool {
        (self.norm() - 1.0).abs() <= UNIT_NORM_TOLERANCE
    }

    /// Squared Euclidean distance. For unit vectors this lies in [0, 4].
    pub fn squared_l2(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// One face found in a frame: its box and its identity embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    /// Detector score in [0, 1]. Informational only.
    pub confidence: f32,
}

/// Enrollment metadata held by the identity directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub identity_key: String,
    pub display_name: String,
    pub student_id: Option<String>,
    pub college: Option<String>,
    pub year_level: Option<String>,
}

/// Metadata block attached to every recognized face in a scan response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceInfo {
    pub id_number: String,
    pub college: String,
    pub year_level: String,
}

impl FaceInfo {
    fn placeholder() -> Self {
        Self {
            id_number: PLACEHOLDER.into(),
            college: PLACEHOLDER.into(),
            year_level: PLACEHOLDER.into(),
        }
    }

    fn stale() -> Self {
        Self {
            id_number: PLACEHOLDER.into(),
            college: ERROR_PLACEHOLDER.into(),
            year_level: ERROR_PLACEHOLDER.into(),
        }
    }

    fn from_record(record: &EnrollmentRecord) -> Self {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| PLACEHOLDER.into());
        Self {
            id_number: field(&record.student_id),
            college: field(&record.college),
            year_level: field(&record.year_level),
        }
    }
}

/// Result of resolving one detection against the index and directory.
///
/// `similarity` is already rounded to two decimals.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        identity_key: String,
        display_name: String,
        similarity: f32,
        record: EnrollmentRecord,
    },
    Unknown {
        similarity: f32,
    },
    /// The index returned a key the directory no longer holds.
    StaleRecord {
        identity_key: String,
        similarity: f32,
    },
}

impl MatchOutcome {
    pub fn display_name(&self) -> &str {
        match self {
            MatchOutcome::Matched { display_name, .. } => display_name,
            MatchOutcome::Unknown { .. } => UNKNOWN_NAME,
            MatchOutcome::StaleRecord { .. } => STALE_RECORD_NAME,
        }
    }

    pub fn similarity(&self) -> f32 {
        match self {
            MatchOutcome::Matched { similarity, .. }
            | MatchOutcome::Unknown { similarity }
            | MatchOutcome::StaleRecord { similarity, .. } => *similarity,
        }
    }

    pub fn identity_key(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { identity_key, .. }
            | MatchOutcome::StaleRecord { identity_key, .. } => Some(identity_key),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    pub fn info(&self) -> FaceInfo {
        match self {
            MatchOutcome::Matched { record, .. } => FaceInfo::from_record(record),
            MatchOutcome::Unknown { .. } => FaceInfo::placeholder(),
            MatchOutcome::StaleRecord { .. } => FaceInfo::stale(),
        }
    }
}

/// Convert a squared L2 distance between unit vectors into cosine similarity.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

/// Round a similarity score to two decimal places for reporting.
pub fn round_similarity(similarity: f32) -> f32 {
    (similarity * 100.0).round() / 100.0
}
