//! Bearer-token authentication for gate devices.
//!
//! Tokens are provisioned out of band; the daemon only ever sees their
//! SHA-256 digests, read from a TOML registry:
//!
//! ```toml
//! [[token]]
//! sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//! role = "GATE"
//! gate_number = "3"
//! expires_at = "2027-06-30T00:00:00Z"   # optional
//! ```

use chrono::{DateTime, Utc};
use gatecheck_store::token_digest;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Role required to submit scans.
pub const GATE_ROLE: &str = "GATE";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization token is missing or invalid")]
    Missing,
    #[error("Invalid or expired token")]
    Invalid,
    #[error("Permission denied. Required role: {required}")]
    Forbidden { required: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read token registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse token registry: {0}")]
    Parse(#[from] toml::de::Error),
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub role: String,
    pub gate_number: String,
}

/// Verifies a bearer credential.
pub trait Authenticator: Send + Sync {
    /// Returns `None` for unknown or expired credentials.
    fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Option<Principal>;
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    token: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenEntry {
    sha256: String,
    role: String,
    #[serde(default = "unassigned_gate")]
    gate_number: String,
    expires_at: Option<DateTime<Utc>>,
}

fn unassigned_gate() -> String {
    "N/A".to_string()
}

/// Token registry keyed by digest.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    entries: HashMap<String, TokenEntry>,
}

impl TokenRegistry {
    pub fn from_toml(text: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(text)?;
        let entries = file
            .token
            .into_iter()
            .map(|e| (e.sha256.trim().to_lowercase(), e))
            .collect();
        Ok(Self { entries })
    }

    /// Load the registry. A missing file yields an empty registry, which
    /// rejects every request.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "token registry not found; all scan requests will be rejected"
            );
            return Ok(Self::default());
        }
        let registry = Self::from_toml(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), tokens = registry.len(), "token registry loaded");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Authenticator for TokenRegistry {
    fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Option<Principal> {
        let entry = self.entries.get(&token_digest(token))?;
        if entry.expires_at.is_some_and(|exp| exp <= now) {
            return None;
        }
        Some(Principal {
            role: entry.role.clone(),
            gate_number: entry.gate_number.clone(),
        })
    }
}

/// Check an `Authorization` header value and the caller's role.
pub fn authorize(
    header: Option<&str>,
    authenticator: &dyn Authenticator,
    required_role: &str,
    now: DateTime<Utc>,
) -> Result<Principal, AuthError> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Missing)?;

    let principal = authenticator
        .authenticate(token, now)
        .ok_or(AuthError::Invalid)?;

    if principal.role != required_role {
        return Err(AuthError::Forbidden {
            required: required_role.to_string(),
        });
    }
    Ok(principal)
}
