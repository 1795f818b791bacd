use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::metrics::{stream, ReplayStats};
use crate::middleware::timing;

/// Routes of the optional status endpoint.
pub fn create_router(stats: Arc<ReplayStats>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        // ── Live replay stats ───────────────────────────────────
        .route("/api/stats", get(stream::get_stats))
        .route("/api/stats/stream", get(stream::stats_stream))
        .with_state(stats)
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Bind the status endpoint and serve it in the background.  A bind failure
/// is logged and otherwise ignored: the replay does not depend on it.
pub async fn spawn(addr: &str, stats: Arc<ReplayStats>) -> Option<tokio::task::JoinHandle<()>> {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot bind status endpoint to {addr}: {e}");
            return None;
        }
    };
    info!("Status endpoint enabled, open http://{addr}/api/stats");
    Some(tokio::spawn(serve(listener, stats)))
}

pub async fn serve(listener: TcpListener, stats: Arc<ReplayStats>) {
    if let Err(e) = axum::serve(listener, create_router(stats)).await {
        error!("Status endpoint exited with error: {e}");
    }
}
