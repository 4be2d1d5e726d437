//! One gate scan, end to end.
//!
//! A scan is split in two halves so the caller can bound the expensive part
//! with a timeout without touching shared state:
//!
//! 1. [`RecognitionPipeline::recognize`] — detect faces, pick the largest,
//!    resolve it. Pure with respect to the cooldown map.
//! 2. [`GateSession::conclude`] — apply the cooldown gate and shape the
//!    response. Only reached after a successful recognition.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::cooldown::{CooldownTracker, LoggingDecision};
use crate::directory::IdentityDirectory;
use crate::frame::Frame;
use crate::index::SimilarityIndex;
use crate::resolver::{MatchResolver, ResolveError};
use crate::types::{BoundingBox, Detection, FaceInfo, MatchOutcome};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Sentinel reported in place of the similarity for suppressed repeats.
pub const COOLDOWN_SENTINEL: &str = "COOLDOWN";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("match resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
}

/// Pick the detection with the largest box area; the first one wins ties.
pub fn select_primary(detections: Vec<Detection>) -> Option<Detection> {
    let mut best: Option<Detection> = None;
    for det in detections {
        let larger = best
            .as_ref()
            .map_or(true, |b| det.bbox.area() > b.bbox.area());
        if larger {
            best = Some(det);
        }
    }
    best
}

/// The resolved primary face of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub bbox: BoundingBox,
    pub outcome: MatchOutcome,
}

/// Detection, primary-face selection and resolution over injected oracles.
pub struct RecognitionPipeline<A> {
    analyzer: A,
    index: Arc<dyn SimilarityIndex>,
    directory: Arc<dyn IdentityDirectory>,
    resolver: MatchResolver,
}

impl<A: FaceAnalyzer> RecognitionPipeline<A> {
    pub fn new(
        analyzer: A,
        index: Arc<dyn SimilarityIndex>,
        directory: Arc<dyn IdentityDirectory>,
        resolver: MatchResolver,
    ) -> Self {
        Self {
            analyzer,
            index,
            directory,
            resolver,
        }
    }

    pub fn index(&self) -> &dyn SimilarityIndex {
        self.index.as_ref()
    }

    /// Returns `Ok(None)` when the frame holds no face.
    pub fn recognize(&mut self, frame: &Frame) -> Result<Option<Recognition>, ScanError> {
        let detections = self.analyzer.analyze(frame)?;
        let Some(primary) = select_primary(detections) else {
            return Ok(None);
        };
        let outcome = self
            .resolver
            .resolve(&primary, self.index.as_ref(), self.directory.as_ref())?;
        Ok(Some(Recognition {
            bbox: primary.bbox,
            outcome,
        }))
    }
}

/// Reported similarity: a rounded score, or the cooldown sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimilarityField {
    Score(f32),
    Cooldown,
}

impl Serialize for SimilarityField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SimilarityField::Score(s) => serializer.serialize_f32(*s),
            SimilarityField::Cooldown => serializer.serialize_str(COOLDOWN_SENTINEL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedFace {
    pub name: String,
    pub similarity: SimilarityField,
    pub bbox: [i32; 4],
    pub info: FaceInfo,
}

/// Response body of a scan: zero or one recognized face.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResponse {
    pub recognized: Vec<RecognizedFace>,
}

/// A scan of a face, with its cooldown decision, for audit and journaling.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEvent {
    pub gate: String,
    pub name: String,
    pub identity_key: Option<String>,
    pub similarity: f32,
    pub decision: LoggingDecision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub response: ScanResponse,
    /// `None` when no face was found.
    pub event: Option<ScanEvent>,
}

/// Cooldown gating and response shaping for scans from any gate.
#[derive(Debug, Clone)]
pub struct GateSession {
    cooldown: Arc<CooldownTracker>,
}

impl GateSession {
    pub fn new(cooldown: Arc<CooldownTracker>) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Run a full scan: recognize, then conclude at `now`.
    pub fn scan<A: FaceAnalyzer>(
        &self,
        pipeline: &mut RecognitionPipeline<A>,
        frame: &Frame,
        gate: &str,
        now: Instant,
    ) -> Result<ScanReport, ScanError> {
        let recognition = pipeline.recognize(frame)?;
        Ok(self.conclude(gate, recognition, now))
    }

    /// Apply the cooldown gate to a finished recognition and build the report.
    pub fn conclude(&self, gate: &str, recognition: Option<Recognition>, now: Instant) -> ScanReport {
        let Some(Recognition { bbox, outcome }) = recognition else {
            return ScanReport {
                response: ScanResponse::default(),
                event: None,
            };
        };

        let name = outcome.display_name().to_string();
        let decision = match &outcome {
            MatchOutcome::Unknown { .. } => LoggingDecision::Bypass,
            MatchOutcome::Matched { .. } | MatchOutcome::StaleRecord { .. } => {
                self.cooldown.should_log(&name, now)
            }
        };

        match decision {
            LoggingDecision::Log => {
                tracing::info!(gate, name = %name, "gate scan LOGGED");
            }
            LoggingDecision::Suppress { remaining } => {
                tracing::info!(
                    gate,
                    name = %name,
                    next_log_in_secs = remaining.as_secs(),
                    "gate scan COOLDOWN ACTIVE"
                );
            }
            LoggingDecision::Bypass => {
                tracing::debug!(gate, name = %name, "gate scan not subject to cooldown");
            }
        }

        let similarity = if decision.is_suppressed() {
            SimilarityField::Cooldown
        } else {
            SimilarityField::Score(outcome.similarity())
        };

        let face = RecognizedFace {
            name: name.clone(),
            similarity,
            bbox: bbox.as_array(),
            info: outcome.info(),
        };
        let event = ScanEvent {
            gate: gate.to_string(),
            name,
            identity_key: outcome.identity_key().map(String::from),
            similarity: outcome.similarity(),
            decision,
        };

        ScanReport {
            response: ScanResponse {
                recognized: vec![face],
            },
            event: Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::index::FlatIndex;
    use crate::types::{Embedding, EnrollmentRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Analyzer stub replaying a fixed detection list.
    struct StubAnalyzer {
        detections: Vec<Detection>,
        calls: Arc<AtomicUsize>,
    }

    impl FaceAnalyzer for StubAnalyzer {
        fn analyze(&mut self, _frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    /// Analyzer that always fails, as a broken model would.
    struct BrokenAnalyzer;

    impl FaceAnalyzer for BrokenAnalyzer {
        fn analyze(&mut self, _frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
            Err(AnalyzerError::Recognizer(
                crate::recognizer::RecognizerError::InferenceFailed("boom".into()),
            ))
        }
    }

    fn det(bbox: [i32; 4], vector: Vec<f32>) -> Detection {
        Detection {
            bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
            embedding: Embedding::normalized(vector),
            confidence: 0.9,
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 4 * 4 * 3], 4, 4).unwrap()
    }

    fn oracles() -> (Arc<dyn SimilarityIndex>, Arc<dyn IdentityDirectory>) {
        let mut index = FlatIndex::new(2);
        index.insert("harvey", vec![1.0, 0.0]).unwrap();
        index.insert("ghost", vec![0.0, 1.0]).unwrap();
        let directory: MemoryDirectory = [EnrollmentRecord {
            identity_key: "harvey".into(),
            display_name: "Harvey Dent".into(),
            student_id: Some("TUPM-21-0001".into()),
            college: Some("COE".into()),
            year_level: Some("3".into()),
        }]
        .into_iter()
        .collect();
        (Arc::new(index), Arc::new(directory))
    }

    fn counted_pipeline(
        detections: Vec<Detection>,
    ) -> (RecognitionPipeline<StubAnalyzer>, Arc<AtomicUsize>) {
        let (index, directory) = oracles();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = RecognitionPipeline::new(
            StubAnalyzer {
                detections,
                calls: Arc::clone(&calls),
            },
            index,
            directory,
            MatchResolver::default(),
        );
        (pipeline, calls)
    }

    fn pipeline(detections: Vec<Detection>) -> RecognitionPipeline<StubAnalyzer> {
        counted_pipeline(detections).0
    }

    fn session() -> GateSession {
        GateSession::new(Arc::new(CooldownTracker::default()))
    }

    #[test]
    fn test_select_primary_largest_area() {
        let picked = select_primary(vec![
            det([0, 0, 10, 10], vec![1.0, 0.0]),
            det([0, 0, 30, 20], vec![0.0, 1.0]),
            det([0, 0, 15, 15], vec![1.0, 1.0]),
        ])
        .unwrap();
        assert_eq!(picked.bbox.as_array(), [0, 0, 30, 20]);
    }

    #[test]
    fn test_select_primary_tie_keeps_first() {
        let picked = select_primary(vec![
            det([0, 0, 10, 20], vec![1.0, 0.0]),
            det([50, 50, 70, 60], vec![0.0, 1.0]),
        ])
        .unwrap();
        assert_eq!(picked.bbox.as_array(), [0, 0, 10, 20]);
        assert!(select_primary(Vec::new()).is_none());
    }

    #[test]
    fn test_scenario_e_no_faces() {
        let session = session();
        let mut pipe = pipeline(Vec::new());
        let report = session
            .scan(&mut pipe, &frame(), "1", Instant::now())
            .unwrap();
        assert!(report.response.recognized.is_empty());
        assert!(report.event.is_none());
        assert!(session.cooldown().is_empty());
        assert_eq!(
            serde_json::to_value(&report.response).unwrap(),
            serde_json::json!({ "recognized": [] })
        );
    }

    #[test]
    fn test_matched_then_cooldown_sentinel() {
        let session = session();
        let mut pipe = pipeline(vec![det([10, 20, 110, 140], vec![1.0, 0.05])]);
        let t0 = Instant::now();

        let first = session.scan(&mut pipe, &frame(), "3", t0).unwrap();
        let face = &first.response.recognized[0];
        assert_eq!(face.name, "Harvey Dent");
        assert_eq!(face.similarity, SimilarityField::Score(1.0));
        assert_eq!(face.bbox, [10, 20, 110, 140]);
        assert_eq!(first.event.as_ref().unwrap().decision, LoggingDecision::Log);

        let second = session
            .scan(&mut pipe, &frame(), "3", t0 + Duration::from_secs(100))
            .unwrap();
        assert_eq!(
            serde_json::to_value(&second.response).unwrap(),
            serde_json::json!({
                "recognized": [{
                    "name": "Harvey Dent",
                    "similarity": "COOLDOWN",
                    "bbox": [10, 20, 110, 140],
                    "info": {"id_number": "TUPM-21-0001", "college": "COE", "year_level": "3"}
                }]
            })
        );

        let third = session
            .scan(&mut pipe, &frame(), "3", t0 + Duration::from_secs(301))
            .unwrap();
        assert_eq!(third.event.unwrap().decision, LoggingDecision::Log);
    }

    #[test]
    fn test_unknown_face_is_reported_and_never_recorded() {
        let session = session();
        // Points away from every enrolled vector.
        let mut pipe = pipeline(vec![det([0, 0, 50, 50], vec![-1.0, -1.0])]);
        let t0 = Instant::now();
        for _ in 0..3 {
            let report = session.scan(&mut pipe, &frame(), "1", t0).unwrap();
            let face = &report.response.recognized[0];
            assert_eq!(face.name, "Unknown");
            assert!(matches!(face.similarity, SimilarityField::Score(_)));
            assert_eq!(face.info.college, "N/A");
            assert_eq!(report.event.unwrap().decision, LoggingDecision::Bypass);
        }
        assert!(session.cooldown().is_empty());
    }

    #[test]
    fn test_stale_record_bypasses_cooldown() {
        let session = session();
        let mut pipe = pipeline(vec![det([0, 0, 50, 50], vec![0.0, 1.0])]);
        let t0 = Instant::now();
        for _ in 0..2 {
            let report = session.scan(&mut pipe, &frame(), "1", t0).unwrap();
            let face = &report.response.recognized[0];
            assert_eq!(face.name, "Stale Record");
            assert_eq!(face.similarity, SimilarityField::Score(1.0));
            assert_eq!(face.info.year_level, "Error");
            let event = report.event.unwrap();
            assert_eq!(event.identity_key.as_deref(), Some("ghost"));
            assert_eq!(event.decision, LoggingDecision::Bypass);
        }
        assert!(session.cooldown().is_empty());
    }

    #[test]
    fn test_failed_recognition_leaves_cooldown_untouched() {
        let session = session();
        let (index, directory) = oracles();
        let mut pipe =
            RecognitionPipeline::new(BrokenAnalyzer, index, directory, MatchResolver::default());
        let err = session
            .scan(&mut pipe, &frame(), "1", Instant::now())
            .unwrap_err();
        assert!(matches!(err, ScanError::Analyzer(_)));
        assert!(session.cooldown().is_empty());
    }

    #[test]
    fn test_identical_detection_resolves_identically_after_reset() {
        let detections = vec![det([0, 0, 40, 40], vec![0.9, 0.2])];
        let t0 = Instant::now();

        let first = session()
            .scan(&mut pipeline(detections.clone()), &frame(), "1", t0)
            .unwrap();
        let second = session()
            .scan(&mut pipeline(detections), &frame(), "1", t0)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_analyzer_runs_once_per_scan() {
        let session = session();
        let (mut pipe, calls) = counted_pipeline(vec![det([0, 0, 40, 40], vec![1.0, 0.0])]);
        let t0 = Instant::now();

        session.scan(&mut pipe, &frame(), "1", t0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A suppressed repeat still analyzes its own frame exactly once.
        let repeat = session.scan(&mut pipe, &frame(), "1", t0).unwrap();
        assert!(repeat.event.unwrap().decision.is_suppressed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let (mut empty, empty_calls) = counted_pipeline(Vec::new());
        session.scan(&mut empty, &frame(), "1", t0).unwrap();
        assert_eq!(empty_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recognize_does_not_touch_cooldown() {
        let session = session();
        let mut pipe = pipeline(vec![det([0, 0, 40, 40], vec![1.0, 0.0])]);
        let recognition = pipe.recognize(&frame()).unwrap().unwrap();
        assert!(session.cooldown().is_empty());
        assert!(matches!(recognition.outcome, MatchOutcome::Matched { .. }));
        assert_eq!(pipe.index().len(), 2);
    }
}
