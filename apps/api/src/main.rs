mod config;
mod errors;
mod feedback;
mod inference;
mod rewrite;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::inference::{AnalysisEngine, LocalAnalysisEngine, ModelSession};
use crate::rewrite::{RewriteClient, Rewriter};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Essay Feedback API v{}", env!("CARGO_PKG_VERSION"));

    // Load the local model once per process. This dominates startup time
    // (minutes for a 7B model); the listener is not bound until it is up.
    info!("Loading analysis model — this can take a few minutes...");
    let model_config = config.clone();
    let session = tokio::task::spawn_blocking(move || ModelSession::load(&model_config)).await??;
    let engine: Arc<dyn AnalysisEngine> = Arc::new(LocalAnalysisEngine::new(
        session,
        Duration::from_secs(config.inference_timeout_secs),
    ));
    info!(
        "Analysis engine ready (timeout: {}s)",
        config.inference_timeout_secs
    );

    // Initialize the rewrite client. Without a credential it stays in
    // degraded mode for the process lifetime.
    let rewrite_client = RewriteClient::new(config.anthropic_api_key.clone());
    if rewrite_client.is_enabled() {
        info!("Rewrite client initialized (model: {})", rewrite::MODEL);
    } else {
        info!("Rewrite client disabled: no ANTHROPIC_API_KEY configured");
    }
    let rewriter: Arc<dyn Rewriter> = Arc::new(rewrite_client);

    // Build app state
    let state = AppState { engine, rewriter };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
