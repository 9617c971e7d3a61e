//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the inbound request onto the single target
//! - Apply fixed headers, forwarding headers and the Host override
//! - Bound the wait for response headers
//! - Stream the upstream response back, scoping its cookies to the client host
//!
//! # Design Decisions
//! - Request bodies are buffered before sending; response bodies stream
//! - No automatic decompression: bytes pass through exactly as sent
//! - Transport failures become `502 Bad Gateway` marked with
//!   [`UpstreamFailure`], so outer layers can tell them from upstream replies
//! - A client disconnect drops this future, which cancels the upstream call

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::capture::request::read_body;
use crate::config::TargetConfig;
use crate::http::headers::{cookie_domain, scope_cookie_domain, strip_hop_by_hop, ForwardedPolicy};
use crate::observability::metrics;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_IDLE_PER_HOST: usize = 100;

/// Why an exchange with the upstream failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid upstream url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid target header {0}")]
    Header(String),

    #[error("failed to read request body: {0}")]
    Body(#[from] crate::capture::request::BodyReadError),

    #[error("upstream did not send headers within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),
}

impl ForwardError {
    fn kind(&self) -> &'static str {
        match self {
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Upstream(e) if e.is_connect() => "connect",
            ForwardError::Upstream(e) if e.is_timeout() => "timeout",
            ForwardError::Body(_) => "body",
            _ => "other",
        }
    }
}

/// Marks a response the proxy generated because the upstream was unreachable.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamFailure;

/// Forwards every request to one upstream base URL.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
    host_override: Option<HeaderValue>,
    fixed_headers: HeaderMap,
    header_timeout: Option<Duration>,
    forwarded: ForwardedPolicy,
    debug: bool,
}

impl Forwarder {
    pub fn new(config: &TargetConfig, debug: bool) -> Result<Self, ForwardError> {
        if config.insecure_skip_verify {
            tracing::warn!(target_url = %config.url, "Upstream TLS certificate verification is disabled");
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(ForwardError::Client)?;

        let mut fixed_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_str(name).map_err(|_| ForwardError::Header(name.clone()))?;
            let value = HeaderValue::from_str(value).map_err(|_| ForwardError::Header(name.to_string()))?;
            fixed_headers.append(name, value);
        }

        let host_override = match config.host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => Some(HeaderValue::from_str(host).map_err(|_| ForwardError::Header("host".into()))?),
            None => None,
        };

        let proto = HeaderValue::from_str(&config.forwarded_proto)
            .map_err(|_| ForwardError::Header("x-forwarded-proto".into()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            host_override,
            fixed_headers,
            header_timeout: config.timeout(),
            forwarded: ForwardedPolicy {
                proto,
                trust_inbound: config.trust_forwarded_headers,
            },
            debug,
        })
    }

    /// Forward a request and return the upstream response (or a 502).
    pub async fn forward(&self, req: Request<Body>, peer: Option<SocketAddr>) -> Response {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut guard = self.debug.then(|| CancelGuard::new(&method, req.uri().to_string()));

        let response = match self.try_forward(req, peer).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_upstream_error(e.kind());
                tracing::error!(method = %method, path = %path, error = %e, "Upstream request failed");
                let mut response =
                    (StatusCode::BAD_GATEWAY, "bad gateway: upstream unavailable").into_response();
                response.extensions_mut().insert(UpstreamFailure);
                response
            }
        };

        if let Some(guard) = guard.as_mut() {
            guard.disarm();
        }
        metrics::record_request(method.as_str(), response.status().as_u16(), start);
        response
    }

    async fn try_forward(
        &self,
        req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Result<Response, ForwardError> {
        let (parts, body) = req.into_parts();

        let url = self.destination(parts.uri.path(), parts.uri.query());
        let url = reqwest::Url::parse(&url).map_err(|source| ForwardError::Url { url, source })?;

        let inbound_host = inbound_host(&parts.headers, &parts.uri);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        self.forwarded
            .apply(&mut headers, peer.map(|p| p.ip()), inbound_host.as_deref());
        for (name, value) in &self.fixed_headers {
            headers.append(name.clone(), value.clone());
        }
        if let Some(host) = &self.host_override {
            headers.insert(header::HOST, host.clone());
        }

        let body = read_body(body).await?;

        let mut outbound = self.client.request(parts.method.clone(), url).headers(headers);
        if !body.is_empty() || method_has_body(&parts.method) {
            outbound = outbound.body(body);
        }

        let send = outbound.send();
        let upstream = match self.header_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| ForwardError::Timeout(limit))?,
            None => send.await,
        }
        .map_err(ForwardError::Upstream)?;

        let domain = inbound_host.as_deref().and_then(cookie_domain);
        Ok(into_response(upstream, domain))
    }

    fn destination(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(query) => format!("{}{}?{}", self.base_url, path, query),
            None => format!("{}{}", self.base_url, path),
        }
    }
}

fn method_has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Host the client addressed, from `Host` or the request-target authority.
fn inbound_host(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
}

fn into_response(upstream: reqwest::Response, cookie_domain: Option<&str>) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let cookies: Vec<HeaderValue> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| HeaderValue::from_str(&scope_cookie_domain(v, cookie_domain)).ok())
        .collect();
    headers.remove(header::SET_COOKIE);
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Logs requests the client abandoned before a response was produced.
struct CancelGuard {
    method: Method,
    uri: String,
    start: Instant,
    armed: bool,
}

impl CancelGuard {
    fn new(method: &Method, uri: String) -> Self {
        Self {
            method: method.clone(),
            uri,
            start: Instant::now(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                method = %self.method,
                url = %self.uri,
                duration = ?self.start.elapsed(),
                "Request canceled"
            );
        }
    }
}
