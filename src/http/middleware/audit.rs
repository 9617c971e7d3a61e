//! Audit interception.
//!
//! # Responsibilities
//! - Gate requests through the filter rules before any capture work
//! - Buffer the request body and tee the response body
//! - Hand the finished record to the publisher once the client has the body
//!
//! # Design Decisions
//! - Unmatched requests pass straight through with no capture overhead
//! - Filters and records see the percent-decoded path
//! - Body normalization runs on the publisher workers, never while the
//!   client is waiting for its last frame
//! - Proxy-generated failures ([`UpstreamFailure`]) are never audited
//! - A client that disconnects mid-body produces no record

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use percent_encoding::percent_decode_str;

use crate::audit::filter::{self, FilterRule};
use crate::audit::publisher::AuditPublisher;
use crate::audit::record::Exchange;
use crate::capture::normalize::is_gzip_encoded;
use crate::capture::request::buffer_request;
use crate::capture::response::{CaptureBody, CapturedResponse};
use crate::http::forward::UpstreamFailure;
use crate::http::middleware::session::CorrelationId;

/// Filter rules plus the queue records are handed to.
#[derive(Clone)]
pub struct AuditState {
    rules: Arc<[FilterRule]>,
    publisher: AuditPublisher,
}

impl AuditState {
    pub fn new(rules: Vec<FilterRule>, publisher: AuditPublisher) -> Self {
        Self {
            rules: rules.into(),
            publisher,
        }
    }
}

pub async fn audit_middleware(
    State(state): State<AuditState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = percent_decode_str(req.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    if !filter::matches(req.method().as_str(), &path, &state.rules) {
        return next.run(req).await;
    }

    let correlation_id = req
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.as_str().to_string());
    let method = req.method().clone();
    let query = req.uri().query().unwrap_or_default().to_string();

    let (req, request_body) = buffer_request(req).await;
    let exchange = Exchange {
        method,
        path,
        query,
        request_body,
        correlation_id,
    };

    let response = next.run(req).await;

    if response.extensions().get::<UpstreamFailure>().is_some() {
        return response;
    }

    let publisher = state.publisher.clone();

    // hyper never polls these bodies, so publish right away.
    if exchange.method == Method::HEAD || is_bodyless(response.status()) {
        let captured = CapturedResponse {
            status: response.status(),
            gzip: is_gzip_encoded(response.headers()),
            body: Bytes::new(),
        };
        publisher.publish_exchange(exchange, captured);
        return response;
    }

    CaptureBody::wrap(response, move |captured| {
        publisher.publish_exchange(exchange, captured);
    })
}

fn is_bodyless(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}
