//! Fetch similarity-index artifacts from remote object storage.
//!
//! Artifacts are only downloaded when missing locally. A failed fetch is a
//! startup failure; nothing here is retried per request.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact {name} is missing locally and no download source is configured")]
    NoSource { name: String },
    #[error("failed to create artifact directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write artifact to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote bucket serving artifacts at `{base_url}/{file_name}`.
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <key>` when set.
    pub api_key: Option<String>,
}

impl ArtifactSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}

/// Make sure every file in `names` exists under `dir`, downloading the
/// missing ones from `source`. Returns the local paths in input order.
pub fn ensure_local(
    dir: &Path,
    names: &[&str],
    source: Option<&ArtifactSource>,
) -> Result<Vec<PathBuf>, ArtifactError> {
    let paths: Vec<PathBuf> = names.iter().map(|n| dir.join(n)).collect();
    let missing: Vec<(&str, &PathBuf)> = names
        .iter()
        .copied()
        .zip(paths.iter())
        .filter(|(_, p)| !p.exists())
        .collect();

    if missing.is_empty() {
        return Ok(paths);
    }

    let Some(source) = source else {
        return Err(ArtifactError::NoSource {
            name: missing[0].0.to_string(),
        });
    };

    tracing::warn!(
        dir = %dir.display(),
        missing = missing.len(),
        "index artifacts missing locally; downloading"
    );
    fs::create_dir_all(dir).map_err(|source| ArtifactError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| ArtifactError::Download {
            url: source.base_url.clone(),
            source: e,
        })?;

    for (name, path) in missing {
        download(&client, source, name, path)?;
        tracing::info!(artifact = name, path = %path.display(), "artifact downloaded");
    }

    Ok(paths)
}

fn download(
    client: &reqwest::blocking::Client,
    source: &ArtifactSource,
    name: &str,
    dest: &Path,
) -> Result<(), ArtifactError> {
    let url = source.url_for(name);
    let download_err = |e: reqwest::Error| ArtifactError::Download {
        url: url.clone(),
        source: e,
    };

    let mut request = client.get(&url);
    if let Some(key) = &source.api_key {
        request = request.bearer_auth(key);
    }
    let bytes = request
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(download_err)?;

    // Write to a sibling temp file, then rename into place.
    let part = dest.with_extension("part");
    let write_err = |path: &Path, e: std::io::Error| ArtifactError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = fs::File::create(&part).map_err(|e| write_err(&part, e))?;
    file.write_all(&bytes).map_err(|e| write_err(&part, e))?;
    file.flush().map_err(|e| write_err(&part, e))?;
    drop(file);
    fs::rename(&part, dest).map_err(|e| write_err(dest, e))?;

    Ok(())
}
