//! Introspection server.
//!
//! - `GET /routes`: route table snapshot, Basic auth
//! - `GET /healthz`: `ok` while accepting, `503 draining` after

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::http::auth::{basic_auth_middleware, BasicCredentials};
use crate::lifecycle::DrainCoordinator;
use crate::registry::{RouteSnapshot, RouteTable};

#[derive(Clone)]
pub struct StatusState {
    pub table: Arc<RouteTable>,
    pub drain: Arc<DrainCoordinator>,
}

pub fn status_router(state: StatusState, credentials: BasicCredentials) -> Router {
    let protected = Router::new()
        .route("/routes", get(get_routes))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            basic_auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .route("/healthz", get(get_health))
        .with_state(state)
}

async fn get_routes(State(state): State<StatusState>) -> Json<RouteSnapshot> {
    Json(state.table.snapshot())
}

async fn get_health(State(state): State<StatusState>) -> impl IntoResponse {
    if state.drain.is_accepting() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    }
}

/// Serve the status router until shutdown fires.
pub async fn serve_status(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Status server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Status server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Endpoint, RoutableHost, RouteSource};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> StatusState {
        let table = Arc::new(RouteTable::new());
        table.register(
            &RoutableHost::new("app.example.com").unwrap(),
            Endpoint::new("10.0.0.1", 8080, "i-1", RouteSource::Announced),
        );
        StatusState {
            table,
            drain: Arc::new(DrainCoordinator::new(Duration::from_secs(1))),
        }
    }

    fn request(uri: &str, auth: Option<&str>) -> axum::http::Request<axum::body::Body> {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(axum::body::Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn routes_require_credentials() {
        let app = status_router(state(), BasicCredentials::new("user", "pass"));
        let response = app.oneshot(request("/routes", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], r#"Basic realm="router""#);
    }

    #[tokio::test]
    async fn routes_snapshot_with_credentials() {
        let app = status_router(state(), BasicCredentials::new("user", "pass"));
        // "user:pass"
        let response = app
            .oneshot(request("/routes", Some("Basic dXNlcjpwYXNz")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"app.example.com": ["10.0.0.1:8080"]}));
    }

    #[tokio::test]
    async fn healthz_reflects_drain() {
        let state = state();
        let drain = state.drain.clone();
        let app = status_router(state, BasicCredentials::new("user", "pass"));

        let response = app.clone().oneshot(request("/healthz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        drain.begin_drain();
        let response = app.oneshot(request("/healthz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
