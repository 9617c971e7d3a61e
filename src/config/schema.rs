//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits so the same schema can be read from a TOML
//! file or assembled from environment flags (see [`crate::config::cli`]).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the audit proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (proxy and health bind addresses).
    pub listener: ListenerConfig,

    /// The single upstream every request is forwarded to.
    pub target: TargetConfig,

    /// Per-client correlation cookie.
    pub session: SessionConfig,

    /// Cross-origin relaxation for browser clients.
    pub cors: CorsConfig,

    /// Audit publishing to the message bus.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Proxy bind address (e.g., "0.0.0.0:80").
    pub bind_address: String,

    /// Health endpoint bind address.
    pub health_address: String,

    /// Log client-canceled requests with their duration.
    pub debug: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            health_address: "0.0.0.0:3003".to_string(),
            debug: false,
        }
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the upstream (required).
    pub url: String,

    /// Outbound `Host` header override.
    pub host: Option<String>,

    /// Fixed headers added to every outbound request.
    pub headers: BTreeMap<String, String>,

    /// Response-header timeout in milliseconds (0 = no cap).
    pub timeout_ms: u64,

    /// Value injected into `X-Forwarded-Proto`.
    pub forwarded_proto: String,

    /// Keep client-supplied `X-Forwarded-*` headers and append to them.
    pub trust_forwarded_headers: bool,

    /// Skip upstream TLS certificate verification.
    pub insecure_skip_verify: bool,
}

impl TargetConfig {
    /// Response-header timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            host: None,
            headers: BTreeMap::new(),
            timeout_ms: 0,
            forwarded_proto: "http".to_string(),
            trust_forwarded_headers: true,
            // Operator-configured internal target.
            insecure_skip_verify: true,
        }
    }
}

/// Session correlation cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Enable the session cookie.
    pub enabled: bool,

    /// Cookie name carrying the correlation id.
    pub cookie_name: String,

    /// Cookie `Max-Age` in seconds.
    pub max_age_secs: u64,
}

impl SessionConfig {
    /// The cookie name when the feature is active.
    pub fn active_cookie_name(&self) -> Option<&str> {
        let name = self.cookie_name.trim();
        (self.enabled && !name.is_empty()).then_some(name)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: "session_id".to_string(),
            max_age_secs: 180 * 24 * 60 * 60, // ~6 months
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Answer preflights and mirror the request origin.
    pub enabled: bool,
}

/// Audit publishing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Enable audit publishing.
    pub enabled: bool,

    /// Kafka bootstrap brokers, comma separated ("host:port").
    pub brokers: String,

    /// Kafka topic records are published to.
    pub topic: String,

    /// Filter rules in `[method:]pattern` form. Empty = audit everything.
    pub filters: Vec<String>,

    /// Bounded queue between request tasks and publish workers.
    pub queue_capacity: usize,

    /// Number of publish workers.
    pub workers: usize,
}

impl AuditConfig {
    /// Audit runs only when enabled and the bus is fully configured.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.broker_list().is_empty() && !self.topic.trim().is_empty()
    }

    /// Broker addresses, trimmed, empties removed.
    pub fn broker_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: String::new(),
            topic: String::new(),
            filters: Vec::new(),
            queue_capacity: 1024,
            workers: 4,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Prometheus exporter bind address; disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_address: None,
        }
    }
}
