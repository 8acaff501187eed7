//! Response handling and transformation.
//!
//! # Responsibilities
//! - Stream backend responses back to the client
//! - Keep the request counted as in flight until the body is delivered
//! - Render router-level failures with an `X-Cf-RouterError` code

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use hyper::body::Incoming;

use crate::http::request::strip_hop_by_hop;
use crate::lifecycle::InFlightGuard;

pub const X_CF_ROUTER_ERROR: &str = "x-cf-routererror";

/// A failure produced by the router itself rather than a backend.
pub fn router_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response<Body> {
    (status, [(X_CF_ROUTER_ERROR, code)], message.into()).into_response()
}

/// Convert a backend response for the client.
///
/// `guard` is released when the body stream finishes or is dropped.
pub fn client_response(response: Response<Incoming>, guard: InFlightGuard) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let stream = Body::new(body).into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_error_carries_code() {
        let response = router_error(StatusCode::NOT_FOUND, "unknown_route", "no such route");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[X_CF_ROUTER_ERROR], "unknown_route");
    }
}
