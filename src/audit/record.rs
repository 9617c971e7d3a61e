//! Audit record construction.

use axum::http::Method;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::capture::normalize::normalize_json;
use crate::capture::response::CapturedResponse;
use crate::observability::metrics;

/// One proxied request/response pair, as published to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub query: String,
    #[serde(rename = "req_body")]
    pub request_body: Option<Box<RawValue>>,
    #[serde(rename = "rep_status")]
    pub response_status: u16,
    #[serde(rename = "rep_body")]
    pub response_body: Option<Box<RawValue>>,
    #[serde(rename = "session_id", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Bus key: the correlation id, else `"<METHOD> <path>"`.
    pub fn publish_key(&self) -> String {
        match &self.correlation_id {
            Some(id) => id.clone(),
            None => format!("{} {}", self.method, self.path),
        }
    }
}

/// Request-side facts captured before forwarding.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub request_body: Bytes,
    pub correlation_id: Option<String>,
}

impl Exchange {
    /// Normalize both bodies and build the record.
    ///
    /// Bodies that are not JSON become `null` and are logged with enough
    /// context to reproduce.
    pub fn into_record(self, captured: CapturedResponse) -> AuditRecord {
        let status = captured.status.as_u16();

        let request_body = normalize_json(&self.request_body, false);
        if !request_body.is_valid() {
            self.warn_invalid("request", status, &self.request_body);
        }

        let response_body = normalize_json(&captured.body, captured.gzip);
        if !response_body.is_valid() {
            self.warn_invalid("response", status, &captured.body);
        }

        AuditRecord {
            timestamp: Utc::now(),
            method: self.method.to_string(),
            path: self.path,
            query: self.query,
            request_body: request_body.value,
            response_status: status,
            response_body: response_body.value,
            correlation_id: self.correlation_id,
        }
    }

    fn warn_invalid(&self, side: &'static str, status: u16, raw: &[u8]) {
        metrics::record_invalid_body(side);
        tracing::warn!(
            side,
            method = %self.method,
            path = %self.path,
            status,
            body = %String::from_utf8_lossy(raw),
            "Body is not valid JSON, recording null"
        );
    }
}
