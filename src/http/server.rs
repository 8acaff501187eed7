//! Proxy server.
//!
//! # Responsibilities
//! - Accept connections while the drain coordinator admits them
//! - Serve each connection with hyper, using the axum router as the service
//! - Dispatch requests: host → route table → endpoint → forward
//! - Map lookup and backend failures to router error responses
//!
//! # Shutdown
//! ```text
//! accepting = false → stop accept loop, close listening socket,
//!                     ask open connections to finish their current response
//! shutdown fired    → abort whatever connections remain
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::TimeoutConfig;
use crate::http::request::{request_id, routable_host, upstream_request};
use crate::http::response::{client_response, router_error};
use crate::lifecycle::DrainCoordinator;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::registry::RouteTable;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<RouteTable>,
    pub client: Client<HttpConnector, Body>,
    pub drain: Arc<DrainCoordinator>,
    pub endpoint_timeout: Duration,
}

impl AppState {
    pub fn new(table: Arc<RouteTable>, drain: Arc<DrainCoordinator>, timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeouts.connect()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            table,
            client,
            drain,
            endpoint_timeout: timeouts.endpoint(),
        }
    }
}

/// The proxy front door.
pub struct ProxyServer {
    listener: Listener,
    router: Router,
    drain: Arc<DrainCoordinator>,
    connections: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(listener: Listener, state: AppState) -> Self {
        let drain = state.drain.clone();
        Self {
            listener,
            router: Self::build_router(state),
            drain,
            connections: ConnectionTracker::new(),
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Accept and serve until admission closes, then until shutdown fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let Self {
            listener,
            router,
            drain,
            connections: tracker,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Proxy server starting");
        }

        let mut connections = JoinSet::new();
        let admission = admission_closed(drain.accepting());
        tokio::pin!(admission);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = tracker.track();
                        let router = router.clone();
                        let accepting = drain.accepting();
                        connections.spawn(async move {
                            let _permit = permit;
                            tracing::trace!(connection_id = %guard.id(), peer = %peer, "Serving connection");
                            serve_connection(stream, peer, router, accepting).await;
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut admission => {
                    tracing::info!(open_connections = tracker.active_count(), "Admission closed, releasing proxy listener");
                    break;
                }
                _ = shutdown.recv() => {
                    connections.shutdown().await;
                    tracing::info!("Proxy server stopped");
                    return;
                }
            }
        }

        drop(listener);

        tokio::select! {
            _ = async { while connections.join_next().await.is_some() {} } => {}
            _ = shutdown.recv() => {
                let severed = tracker.active_count();
                if severed > 0 {
                    tracing::info!(severed, "Closing remaining connections");
                }
            }
        }
        connections.shutdown().await;
        tracing::info!("Proxy server stopped");
    }
}

async fn admission_closed(mut accepting: watch::Receiver<bool>) {
    let _ = accepting.wait_for(|open| !*open).await;
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    accepting: watch::Receiver<bool>,
) {
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(request)
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);
    let admission = admission_closed(accepting);
    tokio::pin!(admission);
    let mut closing = false;

    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = &mut admission, if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Dispatch one request to an endpoint of its host.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let guard = state.drain.track_request();
    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(request.headers()).to_string();

    let Some(host) = routable_host(&request) else {
        tracing::debug!(request_id = %request_id, "Request without a usable host");
        metrics::record_request(&method, 400, "none", start);
        return router_error(StatusCode::BAD_REQUEST, "invalid_host", "Missing or invalid Host header\n");
    };

    let Some(endpoint) = state
        .table
        .lookup(&host)
        .and_then(|pool| pool.select().cloned())
    else {
        tracing::debug!(request_id = %request_id, host = %host, "No route for host");
        metrics::record_request(&method, 404, "none", start);
        return router_error(
            StatusCode::NOT_FOUND,
            "unknown_route",
            format!("Requested route ('{}') does not exist.\n", host),
        );
    };

    let address = endpoint.address();
    let upstream = match upstream_request(request, &address, peer) {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Request could not be rewritten");
            metrics::record_request(&method, 400, &address, start);
            return router_error(StatusCode::BAD_REQUEST, "invalid_request", "Malformed request target\n");
        }
    };

    tracing::debug!(
        request_id = %request_id,
        host = %host,
        backend = %address,
        source = endpoint.source.as_str(),
        "Proxying request"
    );

    match tokio::time::timeout(state.endpoint_timeout, state.client.request(upstream)).await {
        Ok(Ok(response)) => {
            metrics::record_request(&method, response.status().as_u16(), &address, start);
            client_response(response, guard)
        }
        Ok(Err(e)) => {
            tracing::warn!(request_id = %request_id, host = %host, backend = %address, error = %e, "Endpoint request failed");
            metrics::record_request(&method, 502, &address, start);
            router_error(StatusCode::BAD_GATEWAY, "endpoint_failure", "Registered endpoint failed to handle the request.\n")
        }
        Err(_) => {
            tracing::warn!(
                request_id = %request_id,
                host = %host,
                backend = %address,
                timeout_ms = state.endpoint_timeout.as_millis() as u64,
                "Endpoint timed out"
            );
            metrics::record_request(&method, 504, &address, start);
            router_error(StatusCode::GATEWAY_TIMEOUT, "endpoint_timeout", "Registered endpoint timed out.\n")
        }
    }
}
