//! Health endpoint.
//!
//! # Responsibilities
//! - Answer `200 OK` with an empty body for any method and path
//!
//! # Design Decisions
//! - Runs on its own listener, independent of the proxy pipeline
//! - Reports liveness only; upstream state is never probed

use axum::{http::StatusCode, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Router answering every request with an empty `200 OK`.
pub fn health_router() -> Router {
    Router::new().fallback(|| async { StatusCode::OK })
}

/// Serve the health endpoint until `shutdown` fires.
pub async fn serve_health(
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Health server starting");

    axum::serve(listener, health_router())
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Health server stopped");
    Ok(())
}
