//! Command-line and environment configuration.
//!
//! Every flag doubles as an environment variable so the proxy can be
//! configured entirely from the container environment. `--config` switches
//! to a TOML file instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::{LogFormat, ProxyConfig};
use crate::config::validation::validate_config;

/// Audit proxy command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "audit-proxy",
    version,
    about = "Reverse proxy that publishes audit records of proxied traffic to Kafka"
)]
pub struct Cli {
    /// Path to a TOML configuration file (flags below are then ignored).
    #[arg(long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Proxy listen port.
    #[arg(long, env = "HTTP_PORT", default_value_t = 80)]
    pub http_port: u16,

    /// Health endpoint listen port.
    #[arg(long, env = "HEALTH_PORT", default_value_t = 3003)]
    pub health_port: u16,

    /// Log requests canceled by the client.
    #[arg(long, env = "DEBUG", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub debug: bool,

    /// Answer CORS preflights and mirror the request origin.
    #[arg(long, env = "HTTP_CORS", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub http_cors: bool,

    /// Upstream base URL.
    #[arg(long, env = "TARGET_URL")]
    pub target_url: Option<String>,

    /// Outbound Host header override.
    #[arg(long, env = "TARGET_HOST")]
    pub target_host: Option<String>,

    /// Upstream response-header timeout (e.g. "5s", "1m30s").
    #[arg(long, env = "TARGET_TIMEOUT", value_parser = parse_duration)]
    pub target_timeout: Option<Duration>,

    /// Fixed outbound headers as name:value pairs.
    #[arg(long, env = "TARGET_HEADERS", value_delimiter = ',')]
    pub target_headers: Vec<String>,

    /// Skip upstream TLS certificate verification.
    #[arg(long, env = "TARGET_INSECURE_SKIP_VERIFY", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub target_insecure_skip_verify: bool,

    /// Value for the X-Forwarded-Proto header.
    #[arg(long, env = "FORWARDED_PROTO", default_value = "http")]
    pub forwarded_proto: String,

    /// Keep and append to client-supplied X-Forwarded-* headers.
    #[arg(long, env = "TRUST_FORWARDED_HEADERS", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub trust_forwarded_headers: bool,

    /// Issue a correlation cookie to every client.
    #[arg(long, env = "SESSION", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub session: bool,

    /// Correlation cookie name.
    #[arg(long, env = "SESSION_COOKIE", default_value = "session_id")]
    pub session_cookie: String,

    /// Publish audit records to Kafka.
    #[arg(long, env = "LOG_KAFKA", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub log_kafka: bool,

    /// Kafka bootstrap brokers.
    #[arg(long, env = "KAFKA_URL", default_value = "")]
    pub kafka_url: String,

    /// Kafka topic.
    #[arg(long, env = "KAFKA_TOPIC", default_value = "")]
    pub kafka_topic: String,

    /// Audit filter rules in [method:]pattern form.
    #[arg(long, env = "KAFKA_FILTERS", value_delimiter = ',')]
    pub kafka_filters: Vec<String>,

    /// Audit queue capacity.
    #[arg(long, env = "AUDIT_QUEUE_CAPACITY", default_value_t = 1024)]
    pub audit_queue_capacity: usize,

    /// Audit publish workers.
    #[arg(long, env = "AUDIT_WORKERS", default_value_t = 4)]
    pub audit_workers: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Prometheus exporter bind address.
    #[arg(long, env = "METRICS_ADDRESS")]
    pub metrics_address: Option<String>,
}

fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::Duration {
        value: value.to_string(),
        source,
    })
}

impl Cli {
    /// Resolve the effective, validated configuration.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        if let Some(path) = &self.config {
            return load_config(path);
        }

        let mut config = ProxyConfig::default();

        config.listener.bind_address = format!("0.0.0.0:{}", self.http_port);
        config.listener.health_address = format!("0.0.0.0:{}", self.health_port);
        config.listener.debug = self.debug;

        let target = &mut config.target;
        target.url = self
            .target_url
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/')
            .to_string();
        target.host = self.target_host.filter(|h| !h.is_empty());
        target.headers = parse_headers(&self.target_headers)?;
        target.timeout_ms = self
            .target_timeout
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        target.forwarded_proto = self.forwarded_proto;
        target.trust_forwarded_headers = self.trust_forwarded_headers;
        target.insecure_skip_verify = self.target_insecure_skip_verify;

        config.cors.enabled = self.http_cors;

        config.session.enabled = self.session;
        config.session.cookie_name = self.session_cookie;

        config.audit.enabled = self.log_kafka;
        config.audit.brokers = self.kafka_url;
        config.audit.topic = self.kafka_topic;
        config.audit.filters = self
            .kafka_filters
            .into_iter()
            .filter(|f| !f.trim().is_empty())
            .collect();
        config.audit.queue_capacity = self.audit_queue_capacity;
        config.audit.workers = self.audit_workers;

        config.observability.log_level = self.log_level;
        config.observability.log_format = self.log_format;
        config.observability.metrics_address = self.metrics_address;

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

/// Parse `name:value` pairs into a header table.
fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut headers = BTreeMap::new();
    for entry in raw.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedHeader(entry.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::MalformedHeader(entry.to_string()));
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}
