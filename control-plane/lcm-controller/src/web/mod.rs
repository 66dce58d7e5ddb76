use std::net::SocketAddr;

use axum::{Router, routing::get};
use tracing::info;

/// Liveness routes. `/health` is preferred, `/healthz` is kept for probes
/// that still point at it.
pub fn build_router() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
}

pub async fn run_http_server(addr: SocketAddr) -> anyhow::Result<()> {
    info!("lcm controller HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, build_router())
        .await?;
    Ok(())
}
