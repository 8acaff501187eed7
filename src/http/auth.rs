//! HTTP Basic authentication for the status endpoints.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;

const REALM: &str = r#"Basic realm="router""#;

/// Configured status credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    user: String,
    pass: String,
}

impl BasicCredentials {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }

    /// Whether an `Authorization` header carries these credentials.
    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        let Some(encoded) = header
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, pass)) => user == self.user && pass == self.pass,
            None => false,
        }
    }
}

pub async fn basic_auth_middleware(
    State(credentials): State<Arc<BasicCredentials>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if credentials.verify(request.headers().get(header::AUTHORIZATION)) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Rejected status request without valid credentials");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM)],
        "401 Unauthorized\n",
    )
        .into_response()
}
