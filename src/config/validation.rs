//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Target URL must parse with an http/https scheme
//! - Header names/values must be valid on the wire
//! - Validate value ranges (workers > 0, queue > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Filter rules are NOT validated here: a bad rule is skipped at startup
//!   with a warning instead of refusing to serve

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("target url is required")]
    MissingTargetUrl,

    #[error("target url {url:?} is invalid: {reason}")]
    InvalidTargetUrl { url: String, reason: String },

    #[error("target url scheme {0:?} is not http or https")]
    UnsupportedScheme(String),

    #[error("target host override must not be empty")]
    EmptyTargetHost,

    #[error("invalid outbound header {name:?}")]
    InvalidHeader { name: String },

    #[error("invalid forwarded proto {0:?}")]
    InvalidForwardedProto(String),

    #[error("{field} {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid session cookie name {0:?}")]
    InvalidCookieName(String),

    #[error("audit workers must be greater than zero")]
    ZeroWorkers,

    #[error("audit queue capacity must be greater than zero")]
    ZeroQueueCapacity,
}

/// Validate a fully assembled configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_target(config, &mut errors);

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);
    check_address("listener.health_address", &config.listener.health_address, &mut errors);
    if let Some(addr) = &config.observability.metrics_address {
        check_address("observability.metrics_address", addr, &mut errors);
    }

    if config.session.enabled && !is_cookie_name(config.session.cookie_name.trim()) {
        errors.push(ValidationError::InvalidCookieName(config.session.cookie_name.clone()));
    }

    if config.audit.enabled {
        if config.audit.workers == 0 {
            errors.push(ValidationError::ZeroWorkers);
        }
        if config.audit.queue_capacity == 0 {
            errors.push(ValidationError::ZeroQueueCapacity);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_target(config: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    let target = &config.target;

    if target.url.trim().is_empty() {
        errors.push(ValidationError::MissingTargetUrl);
    } else {
        match Url::parse(target.url.trim()) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::UnsupportedScheme(url.scheme().to_string())),
            Err(e) => errors.push(ValidationError::InvalidTargetUrl {
                url: target.url.clone(),
                reason: e.to_string(),
            }),
        }
    }

    if let Some(host) = &target.host {
        if host.trim().is_empty() || HeaderValue::from_str(host).is_err() {
            errors.push(ValidationError::EmptyTargetHost);
        }
    }

    for (name, value) in &target.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::InvalidHeader { name: name.clone() });
        }
    }

    if HeaderValue::from_str(&target.forwarded_proto).is_err() || target.forwarded_proto.is_empty() {
        errors.push(ValidationError::InvalidForwardedProto(target.forwarded_proto.clone()));
    }
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// RFC 6265 cookie-name: an HTTP token.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
