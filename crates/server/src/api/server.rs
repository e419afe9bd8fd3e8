use anyhow::{Context as _, Result};
use axum::Router;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use git_http::git_router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics_exporter::render_metrics;
use crate::state::AppState;

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

pub fn build_api_router(state: AppState) -> Router {
    git_router(state)
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_api(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    let addr = listener.local_addr()?;
    info!(%addr, "git gateway listening");

    axum::serve(listener, build_api_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("http server failed")?;
    info!("http server drained");
    Ok(())
}
