//! Header rewriting between client and upstream.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Maintain the `X-Forwarded-*` / `X-Real-IP` family
//! - Scope upstream cookies to the client-facing host

use std::net::IpAddr;

use axum::http::uri::Authority;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// How the forwarding headers of an outbound request are derived.
#[derive(Debug, Clone)]
pub struct ForwardedPolicy {
    pub proto: HeaderValue,
    pub trust_inbound: bool,
}

impl ForwardedPolicy {
    /// Rewrite the forwarding family in place.
    ///
    /// `host` is the inbound Host as the client sent it.
    pub fn apply(&self, headers: &mut HeaderMap, peer: Option<IpAddr>, host: Option<&str>) {
        let has_inbound = headers.contains_key(&X_REAL_IP)
            || headers.contains_key(&X_FORWARDED_FOR)
            || headers.contains_key(&X_FORWARDED_PROTO);

        if has_inbound && !self.trust_inbound {
            headers.remove(&X_REAL_IP);
            headers.remove(&X_FORWARDED_FOR);
            headers.remove(&X_FORWARDED_PROTO);
        }

        if let Some(peer) = peer.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok()) {
            if has_inbound && self.trust_inbound {
                append_forwarded_for(headers, &peer);
                if !headers.contains_key(&X_FORWARDED_PROTO) {
                    headers.insert(X_FORWARDED_PROTO, self.proto.clone());
                }
            } else {
                headers.insert(X_REAL_IP, peer.clone());
                headers.insert(X_FORWARDED_FOR, peer);
                headers.insert(X_FORWARDED_PROTO, self.proto.clone());
            }
        }

        if let Some(host) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: &HeaderValue) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches(','))
        .filter(|v| !v.is_empty())
        .collect();

    let chain = match peer.to_str() {
        Ok(peer) if !prior.is_empty() => format!("{}, {}", prior.join(", "), peer),
        _ => {
            headers.insert(X_FORWARDED_FOR, peer.clone());
            return;
        }
    };

    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// The host part of a `Host` header value, without port.
pub fn host_without_port(host: &str) -> Option<&str> {
    let authority: Authority = host.parse().ok()?;
    let start = host.find(authority.host())?;
    let bare = &host[start..start + authority.host().len()];
    (!bare.is_empty()).then_some(bare)
}

/// `Domain` for cookies served under `host`; none for bracketed IPv6 literals.
pub fn cookie_domain(host: &str) -> Option<&str> {
    host_without_port(host).filter(|h| !h.starts_with('['))
}

/// Replace any `Domain` attribute of a `Set-Cookie` value with `domain`.
pub fn scope_cookie_domain(set_cookie: &str, domain: Option<&str>) -> String {
    let mut parts = set_cookie.split(';');
    let mut scoped = parts.next().unwrap_or_default().trim().to_string();

    for attr in parts.map(str::trim).filter(|a| !a.is_empty()) {
        let name = attr.split('=').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("domain") {
            continue;
        }
        scoped.push_str("; ");
        scoped.push_str(attr);
    }

    if let Some(domain) = domain.filter(|d| !d.is_empty()) {
        scoped.push_str("; Domain=");
        scoped.push_str(domain);
    }

    scoped
}
