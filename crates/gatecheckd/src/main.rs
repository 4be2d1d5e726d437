use std::sync::Arc;

use anyhow::{Context, Result};
use gatecheck_core::{CooldownTracker, GateSession};
use gatecheck_store::ScanJournal;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod engine;
mod http;

use auth::TokenRegistry;
use http::{AppState, RecognitionState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_addr,
        "gatecheckd starting"
    );

    let registry = TokenRegistry::load(&config.tokens_path)
        .with_context(|| format!("loading {}", config.tokens_path.display()))?;
    let journal = ScanJournal::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let recognition = start_recognition(config.clone()).await;

    let state = AppState {
        auth: Arc::new(registry),
        recognition,
        session: GateSession::new(Arc::new(CooldownTracker::new(config.cooldown))),
        journal: Some(Arc::new(journal)),
        scan_timeout: config.scan_timeout,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "gatecheckd ready");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gatecheckd shutting down");
    Ok(())
}

/// Load artifacts, models and index off the runtime. Failure is logged and
/// served as an unavailable recognition stack rather than aborting.
async fn start_recognition(config: config::Config) -> RecognitionState {
    let started = tokio::task::spawn_blocking(move || {
        engine::build_pipeline(&config).and_then(engine::spawn_engine)
    })
    .await;

    match started {
        Ok(Ok(handle)) => {
            tracing::info!(index_size = handle.index_size(), "recognition engine started");
            RecognitionState::Ready(handle)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "recognition_unavailable: startup failed");
            RecognitionState::Unavailable(e.to_string().into())
        }
        Err(e) => {
            tracing::error!(error = %e, "recognition_unavailable: startup task panicked");
            RecognitionState::Unavailable("recognition startup panicked".into())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
