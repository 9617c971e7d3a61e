//! Session correlation cookie.
//!
//! # Responsibilities
//! - Reuse the client's correlation id from its cookie, or mint one
//! - Expose the id to inner layers as a typed request extension
//! - (Re)issue the cookie on every response
//!
//! # Design Decisions
//! - No server-side store; the cookie is the only persistence
//! - A cookie value that cannot be echoed back safely is treated as absent

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::config::SessionConfig;

/// Correlation id attached to every request that passed the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cookie settings shared by the session layer.
#[derive(Debug, Clone)]
pub struct SessionState {
    cookie_name: Arc<str>,
    max_age_secs: u64,
}

impl SessionState {
    /// `None` when the session feature is off or has no cookie name.
    pub fn from_config(config: &SessionConfig) -> Option<Self> {
        let cookie_name = config.active_cookie_name()?;
        tracing::info!(cookie = cookie_name, "Session middleware enabled");
        Some(Self {
            cookie_name: Arc::from(cookie_name),
            max_age_secs: config.max_age_secs,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn set_cookie(&self, id: &str) -> Option<HeaderValue> {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.cookie_name, id, self.max_age_secs
        );
        HeaderValue::from_str(&cookie).ok()
    }
}

pub async fn session_middleware(
    State(state): State<SessionState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let id = read_cookie(req.headers(), state.cookie_name())
        .filter(|v| is_cookie_value(v))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(CorrelationId(id.clone()));

    let mut response = next.run(req).await;

    match state.set_cookie(&id) {
        Some(cookie) => {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        None => tracing::warn!(cookie = state.cookie_name(), "Could not encode session cookie"),
    }

    response
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .find(|value| !value.is_empty())
}

// RFC 6265 cookie-octet
fn is_cookie_value(value: &str) -> bool {
    value.bytes().all(|b| {
        matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
    })
}
