//! Body normalization.
//!
//! Reduces arbitrary captured bytes to either well-formed JSON or an
//! explicit `null`, after optional gzip decoding.

use std::io::Read;

use axum::http::{header, HeaderMap};
use flate2::read::GzDecoder;
use serde_json::value::RawValue;

/// Whether the captured bytes were usable as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyValidity {
    Valid,
    Invalid,
}

/// A body ready to be embedded into an audit record.
///
/// `None` serializes as the JSON `null` literal.
#[derive(Debug, Clone)]
pub struct NormalizedBody {
    pub value: Option<Box<RawValue>>,
    pub validity: BodyValidity,
}

impl NormalizedBody {
    fn null(validity: BodyValidity) -> Self {
        Self {
            value: None,
            validity,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity == BodyValidity::Valid
    }

    /// JSON text of the value (`null` when absent).
    pub fn as_json(&self) -> &str {
        self.value.as_deref().map(RawValue::get).unwrap_or("null")
    }
}

/// True when the headers declare a gzip content encoding.
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
        })
        .unwrap_or(false)
}

/// Normalize captured bytes into JSON or `null`.
///
/// A broken gzip stream counts as "no body" rather than an error.
pub fn normalize_json(data: &[u8], gzip: bool) -> NormalizedBody {
    let decoded;
    let data = if gzip {
        decoded = gunzip(data).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Failed to decompress gzip body");
            Vec::new()
        });
        decoded.as_slice()
    } else {
        data
    };

    if data.is_empty() {
        return NormalizedBody::null(BodyValidity::Valid);
    }

    match serde_json::from_slice::<Box<RawValue>>(data) {
        Ok(value) => NormalizedBody {
            value: Some(value),
            validity: BodyValidity::Valid,
        },
        Err(_) => NormalizedBody::null(BodyValidity::Invalid),
    }
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
