//! gatecheck-core — Face matching and scan gating for campus gate checks.
//!
//! Resolves the largest face in a frame to an enrolled identity through a
//! nearest-neighbor index and an identity directory, then de-duplicates
//! repeat sightings with a per-name cooldown. Detection and embedding run
//! SCRFD + ArcFace on ONNX Runtime.

pub mod alignment;
pub mod analyzer;
pub mod cooldown;
pub mod detector;
pub mod directory;
pub mod frame;
pub mod index;
pub mod recognizer;
pub mod resolver;
pub mod session;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use cooldown::{CooldownTracker, LoggingDecision};
pub use directory::{DirectoryError, IdentityDirectory, MemoryDirectory};
pub use frame::{Frame, FrameError};
pub use index::{FlatIndex, IndexError, Neighbor, SimilarityIndex};
pub use resolver::{MatchResolver, ResolveError};
pub use session::{
    GateSession, Recognition, RecognitionPipeline, ScanError, ScanEvent, ScanReport, ScanResponse,
};
pub use types::{BoundingBox, Detection, Embedding, EnrollmentRecord, FaceInfo, MatchOutcome};
