//! Request body buffering.
//!
//! # Responsibilities
//! - Drain the inbound body into memory
//! - Hand the same bytes back as a fresh body for forwarding
//!
//! # Design Decisions
//! - A read failure is not fatal: the body is treated as empty and the
//!   request continues
//! - `Bytes` clones are reference-counted, so the audit copy costs nothing

use axum::body::{Body, Bytes};
use axum::http::Request;
use thiserror::Error;

/// The inbound body stream failed before it was fully read.
#[derive(Debug, Error)]
#[error("failed to read request body: {0}")]
pub struct BodyReadError(#[source] pub axum::Error);

/// Read a body fully into memory.
pub async fn read_body(body: Body) -> Result<Bytes, BodyReadError> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(BodyReadError)
}

/// Buffer the request body and return a re-readable request plus the bytes.
pub async fn buffer_request(request: Request<Body>) -> (Request<Body>, Bytes) {
    let (parts, body) = request.into_parts();

    let bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                error = %e,
                "Treating unreadable request body as empty"
            );
            Bytes::new()
        }
    };

    (Request::from_parts(parts, Body::from(bytes.clone())), bytes)
}
