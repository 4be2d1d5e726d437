use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gatecheck_core::analyzer::{DEFAULT_DETECTOR_MODEL, DEFAULT_RECOGNIZER_MODEL};
use gatecheck_core::cooldown::DEFAULT_COOLDOWN;
use gatecheck_core::resolver::DEFAULT_SIMILARITY_THRESHOLD;
use gatecheck_store::ArtifactSource;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:5000).
    pub bind_addr: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub recognizer_model: String,
    /// Directory holding the similarity-index artifact.
    pub index_dir: PathBuf,
    pub index_file: String,
    /// Remote bucket for missing index artifacts. Unset disables download.
    pub artifact_url: Option<String>,
    pub artifact_api_key: Option<String>,
    /// Path to the SQLite database (directory + journal).
    pub db_path: PathBuf,
    /// Path to the bearer-token registry.
    pub tokens_path: PathBuf,
    /// Minimum cosine similarity for a positive match.
    pub similarity_threshold: f32,
    pub cooldown: Duration,
    /// Upper bound on detection + resolution for one scan.
    pub scan_timeout: Duration,
}

impl Config {
    /// Load configuration from `GATECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = gatecheck_store::default_data_dir();

        Self {
            bind_addr: std::env::var("GATECHECK_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5000))),
            model_dir: env_path("GATECHECK_MODEL_DIR", data_dir.join("models")),
            detector_model: env_string("GATECHECK_DETECTOR_MODEL", DEFAULT_DETECTOR_MODEL),
            recognizer_model: env_string("GATECHECK_RECOGNIZER_MODEL", DEFAULT_RECOGNIZER_MODEL),
            index_dir: env_path("GATECHECK_INDEX_DIR", data_dir.join("embeddings")),
            index_file: env_string("GATECHECK_INDEX_FILE", "face_index.json"),
            artifact_url: std::env::var("GATECHECK_ARTIFACT_URL").ok(),
            artifact_api_key: std::env::var("GATECHECK_ARTIFACT_API_KEY").ok(),
            db_path: env_path("GATECHECK_DB_PATH", data_dir.join("gatecheck.db")),
            tokens_path: env_path("GATECHECK_TOKENS_PATH", data_dir.join("tokens.toml")),
            similarity_threshold: env_f32(
                "GATECHECK_SIMILARITY_THRESHOLD",
                DEFAULT_SIMILARITY_THRESHOLD,
            ),
            cooldown: Duration::from_secs(env_u64(
                "GATECHECK_COOLDOWN_SECS",
                DEFAULT_COOLDOWN.as_secs(),
            )),
            scan_timeout: Duration::from_secs(env_u64("GATECHECK_SCAN_TIMEOUT_SECS", 10)),
        }
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(&self.index_file)
    }

    pub fn artifact_source(&self) -> Option<ArtifactSource> {
        let url = self.artifact_url.as_ref()?;
        let source = ArtifactSource::new(url.clone());
        Some(match &self.artifact_api_key {
            Some(key) => source.with_api_key(key.clone()),
            None => source,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
