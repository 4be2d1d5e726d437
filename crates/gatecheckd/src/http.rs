//! HTTP surface of the scan service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gatecheck_core::{Frame, FrameError, GateSession, LoggingDecision, ScanResponse};
use gatecheck_store::ScanJournal;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::auth::{authorize, AuthError, Authenticator, Principal, GATE_ROLE};
use crate::engine::{EngineError, EngineHandle};

/// Upload limit for one frame.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("No frame file provided in request.")]
    FrameMissing,
    #[error("Could not decode image frame.")]
    FrameDecode(#[source] FrameError),
    /// Details stay in the server log; clients get a fixed message.
    #[error("Recognition system failed to initialize. Check console for details.")]
    RecognitionUnavailable,
    #[error("Unexpected internal server error during face recognition.")]
    Internal(#[from] EngineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(AuthError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::FrameMissing | ApiError::FrameDecode(_) => StatusCode::BAD_REQUEST,
            ApiError::RecognitionUnavailable | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Whether the recognition stack came up at startup.
#[derive(Clone)]
pub enum RecognitionState {
    Ready(EngineHandle),
    Unavailable(Arc<str>),
}

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<dyn Authenticator>,
    pub recognition: RecognitionState,
    pub session: GateSession,
    pub journal: Option<Arc<ScanJournal>>,
    pub scan_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/scan", post(scan))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({ "message": "Face Recognition API is running." }))
}

#[derive(Debug, Serialize)]
struct StatusBody {
    version: &'static str,
    recognition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    index_size: usize,
    cooldown_entries: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let (recognition, reason, index_size) = match &state.recognition {
        RecognitionState::Ready(engine) => ("ready", None, engine.index_size()),
        RecognitionState::Unavailable(reason) => ("unavailable", Some(reason.to_string()), 0),
    };
    Json(StatusBody {
        version: env!("CARGO_PKG_VERSION"),
        recognition,
        reason,
        index_size,
        cooldown_entries: state.session.cooldown().len(),
    })
}

/// Handler for POST /scan. The credential is checked before the body is read.
async fn scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let principal = authenticate(&state, &headers)?;

    let mut multipart = multipart.map_err(|e| {
        tracing::debug!(error = %e, "scan request is not multipart");
        ApiError::FrameMissing
    })?;
    let bytes = read_frame_field(&mut multipart)
        .await?
        .ok_or(ApiError::FrameMissing)?;

    let response = run_scan(&state, &principal.gate_number, &bytes).await?;
    Ok(Json(response))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    authorize(header, state.auth.as_ref(), GATE_ROLE, Utc::now()).map_err(|e| {
        tracing::warn!(error = %e, "scan request rejected");
        ApiError::from(e)
    })
}

async fn read_frame_field(multipart: &mut Multipart) -> Result<Option<Bytes>, ApiError> {
    loop {
        let field = multipart.next_field().await.map_err(|e| {
            tracing::debug!(error = %e, "malformed multipart body");
            ApiError::FrameMissing
        })?;
        let Some(field) = field else {
            return Ok(None);
        };
        if field.name() == Some("frame") {
            let bytes = field.bytes().await.map_err(|e| {
                tracing::debug!(error = %e, "failed to read frame field");
                ApiError::FrameMissing
            })?;
            return Ok(Some(bytes));
        }
    }
}

/// Decode, recognize and conclude one frame from `gate`.
async fn run_scan(state: &AppState, gate: &str, bytes: &[u8]) -> Result<ScanResponse, ApiError> {
    let frame = Frame::decode(bytes).map_err(|e| {
        tracing::debug!(gate, error = %e, "frame decode failed");
        ApiError::FrameDecode(e)
    })?;

    let engine = match &state.recognition {
        RecognitionState::Ready(engine) => engine,
        RecognitionState::Unavailable(reason) => {
            tracing::error!(gate, reason = %reason, "scan rejected: recognition_unavailable");
            return Err(ApiError::RecognitionUnavailable);
        }
    };

    let recognition = engine
        .recognize(frame, state.scan_timeout)
        .await
        .map_err(|e| {
            tracing::error!(gate, at = %Utc::now(), error = %e, "scan failed");
            ApiError::Internal(e)
        })?;

    let report = state.session.conclude(gate, recognition, Instant::now());

    if let (Some(event), Some(journal)) = (report.event, &state.journal) {
        if event.decision == LoggingDecision::Log {
            let journal = Arc::clone(journal);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = journal.record(&event) {
                    tracing::warn!(gate = %event.gate, name = %event.name, error = %e, "failed to journal scan");
                }
            });
        }
    }

    Ok(report.response)
}
