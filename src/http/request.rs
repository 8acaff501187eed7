//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract the routable host (absolute URI authority, else `Host`)
//! - Strip hop-by-hop headers
//! - Rewrite the request for the chosen endpoint with forwarding headers
//!
//! # Design Decisions
//! - The request ID is assigned by middleware before any handler runs
//! - The original `Host` header is kept so backends see the public name

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use axum::http::uri::{Authority, Scheme};
use axum::http::{Request, Uri, Version};
use std::net::SocketAddr;
use std::str::FromStr;

use crate::registry::RoutableHost;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The request ID set by the request-id layer, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// The host a request is addressed to.
pub fn routable_host<B>(request: &Request<B>) -> Option<RoutableHost> {
    let raw = request
        .uri()
        .authority()
        .map(Authority::as_str)
        .or_else(|| request.headers().get(HOST).and_then(|v| v.to_str().ok()))?;
    RoutableHost::from_authority(raw)
}

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Rewrite `request` so it targets `address` on behalf of `peer`.
pub fn upstream_request(
    request: Request<Body>,
    address: &str,
    peer: SocketAddr,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();

    if !parts.headers.contains_key(HOST) {
        if let Some(authority) = parts.uri.authority() {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(HOST, value);
            }
        }
    }

    let path = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(address)
        .path_and_query(path)
        .build()?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);

    let client_ip = peer.ip().to_string();
    let forwarded_for = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        parts.headers.insert(X_FORWARDED_FOR, value);
    }
    if !parts.headers.contains_key(X_FORWARDED_PROTO) {
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    Ok(Request::from_parts(parts, body))
}
