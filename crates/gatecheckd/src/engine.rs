use std::sync::Arc;
use std::time::Duration;

use gatecheck_core::{
    AnalyzerError, FaceAnalyzer, FlatIndex, Frame, IndexError, MatchResolver, OnnxFaceAnalyzer,
    Recognition, RecognitionPipeline, ScanError, SimilarityIndex,
};
use gatecheck_store::{artifacts, ArtifactError, SqliteDirectory, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("index artifacts unavailable: {0}")]
    Artifacts(#[from] ArtifactError),
    #[error("similarity index: {0}")]
    Index(#[from] IndexError),
    #[error("face models: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("identity directory: {0}")]
    Directory(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
struct RecognizeRequest {
    frame: Frame,
    reply: oneshot::Sender<Result<Option<Recognition>, ScanError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<RecognizeRequest>,
    index_size: usize,
}

impl EngineHandle {
    /// Number of entries in the loaded similarity index.
    pub fn index_size(&self) -> usize {
        self.index_size
    }

    /// Detect and resolve the primary face of `frame`, bounded by `timeout`.
    ///
    /// On timeout the engine keeps working on the frame; its result is
    /// discarded and no shared state has been touched.
    pub async fn recognize(
        &self,
        frame: Frame,
        timeout: Duration,
    ) -> Result<Option<Recognition>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = async {
            self.tx
                .send(RecognizeRequest {
                    frame,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
            Ok(result?)
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| EngineError::Scan(ScanError::Timeout(timeout)))?
    }
}

/// Fetch artifacts, load the index, models and directory.
///
/// Blocking; call from a blocking context. Any failure here leaves the
/// process without recognition until restart.
pub fn build_pipeline(config: &Config) -> Result<RecognitionPipeline<OnnxFaceAnalyzer>, EngineError> {
    let source = config.artifact_source();
    artifacts::ensure_local(&config.index_dir, &[config.index_file.as_str()], source.as_ref())?;

    let index = FlatIndex::load(&config.index_path())?;
    let analyzer = OnnxFaceAnalyzer::load(&config.detector_path(), &config.recognizer_path())?;
    let directory = SqliteDirectory::open(&config.db_path)?;
    tracing::info!(
        threshold = config.similarity_threshold,
        enrolled = directory.count().unwrap_or(0),
        "recognition pipeline ready"
    );

    Ok(RecognitionPipeline::new(
        analyzer,
        Arc::new(index),
        Arc::new(directory),
        MatchResolver::new(config.similarity_threshold),
    ))
}

/// Move `pipeline` onto a dedicated OS thread and return a handle to it.
pub fn spawn_engine<A>(mut pipeline: RecognitionPipeline<A>) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + 'static,
{
    let index_size = pipeline.index().len();
    let (tx, mut rx) = mpsc::channel::<RecognizeRequest>(4);

    std::thread::Builder::new()
        .name("gatecheck-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let result = pipeline.recognize(&req.frame);
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "recognition failed");
                }
                // The requester may have timed out and gone away.
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, index_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecheck_core::types::{BoundingBox, Detection, Embedding, EnrollmentRecord};
    use gatecheck_core::{MatchOutcome, MemoryDirectory};

    /// Analyzer returning one fixed face after an optional delay.
    struct SlowAnalyzer {
        delay: Duration,
    }

    impl FaceAnalyzer for SlowAnalyzer {
        fn analyze(&mut self, _frame: &Frame) -> Result<Vec<Detection>, AnalyzerError> {
            std::thread::sleep(self.delay);
            Ok(vec![Detection {
                bbox: BoundingBox::new(1, 2, 30, 40),
                embedding: Embedding::normalized(vec![1.0, 0.0]),
                confidence: 0.99,
            }])
        }
    }

    fn engine(delay: Duration) -> EngineHandle {
        let mut index = FlatIndex::new(2);
        index.insert("harvey", vec![1.0, 0.0]).unwrap();
        let directory: MemoryDirectory = [EnrollmentRecord {
            identity_key: "harvey".into(),
            display_name: "Harvey Dent".into(),
            student_id: None,
            college: None,
            year_level: None,
        }]
        .into_iter()
        .collect();
        spawn_engine(RecognitionPipeline::new(
            SlowAnalyzer { delay },
            Arc::new(index),
            Arc::new(directory),
            MatchResolver::default(),
        ))
        .unwrap()
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 2 * 2 * 3], 2, 2).unwrap()
    }

    #[tokio::test]
    async fn test_engine_recognizes() {
        let handle = engine(Duration::ZERO);
        assert_eq!(handle.index_size(), 1);
        let recognition = handle
            .recognize(frame(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recognition.bbox.as_array(), [1, 2, 30, 40]);
        assert!(matches!(recognition.outcome, MatchOutcome::Matched { .. }));
    }

    #[tokio::test]
    async fn test_engine_timeout_is_scan_error() {
        let handle = engine(Duration::from_millis(500));
        let err = handle
            .recognize(frame(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Scan(ScanError::Timeout(_))));
    }
}
