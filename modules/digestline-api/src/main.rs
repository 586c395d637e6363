use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use digestline_common::{load_config, Config};
use digestline_run::infra::live_deps;
use digestline_run::Orchestrator;

mod auth;
mod routes;

use auth::TriggerSecret;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub secret: TriggerSecret,
    /// Held for the duration of a run; a second trigger gets 409.
    pub run_slot: Mutex<()>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/runs", post(routes::trigger_run))
        .with_state(state)
        // Method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("digestline=info".parse()?))
        .init();

    let config = Config::from_env()?;
    let file_config = load_config(&config.config_path)?;

    let secret = TriggerSecret::new(config.run_trigger_secret.as_deref());
    if !secret.is_configured() {
        warn!("RUN_TRIGGER_SECRET not set, every trigger request will be refused");
    }

    let deps = live_deps(&config, &file_config).await?;
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(deps, file_config),
        secret,
        run_slot: Mutex::new(()),
    });

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Digestline trigger API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}
