//! Shared utilities for integration testing.
#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use dynamic_router::config::RouterConfig;
use dynamic_router::registry::{
    Action, Endpoint, RegistryEvent, RegistryUpdate, RoutableHost, RouteSource,
};
use dynamic_router::RunningRouter;

/// Router config bound to ephemeral loopback ports, no bus, no poller.
pub fn test_config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.status.bind_address = "127.0.0.1:0".into();
    config.status.user = "status-user".into();
    config.status.pass = "status-pass".into();
    config.registry.prune_interval_secs = 1;
    config.registry.stale_threshold_secs = 60;
    config.registry.start_delay_secs = 0;
    config.timeouts.endpoint_secs = 5;
    config.timeouts.connect_secs = 1;
    config.timeouts.drain_secs = 5;
    config
}

/// HTTP client without pooling or proxies so each request opens its own connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// Announce `backend` for `host` through the router's update queue and wait until it is routable.
pub async fn announce(router: &RunningRouter, host: &str, backend: SocketAddr) {
    let routable = RoutableHost::new(host).unwrap();
    router
        .registry_updates()
        .send(RegistryUpdate::Event(RegistryEvent {
            action: Action::Announce,
            hosts: vec![routable.clone()],
            endpoint: Endpoint::new(
                backend.ip().to_string(),
                backend.port(),
                "",
                RouteSource::Announced,
            ),
        }))
        .await
        .unwrap();

    let table = router.table();
    assert!(
        eventually(Duration::from_secs(2), || table.lookup(&routable).is_some()).await,
        "route for {} never appeared",
        host
    );
}

/// Request `path` on the proxy for `host`.
pub async fn get_via(router: &RunningRouter, host: &str, path: &str) -> reqwest::Result<reqwest::Response> {
    client()
        .get(format!("http://{}{}", router.proxy_addr(), path))
        .header("host", host)
        .send()
        .await
}

/// A port nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(socket);
                        read_request_head(&mut reader).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let mut socket = reader.into_inner();
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// A backend that holds each request until the gate opens.
pub struct GatedBackend {
    pub addr: SocketAddr,
    pub received: Arc<AtomicUsize>,
    gate: watch::Sender<bool>,
}

impl GatedBackend {
    pub async fn start(response: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let (gate, gate_rx) = watch::channel(false);

        let counter = received.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let counter = counter.clone();
                let mut gate_rx = gate_rx.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    read_request_head(&mut reader).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = gate_rx.wait_for(|open| *open).await;

                    let response_str = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        response.len(),
                        response
                    );
                    let mut socket = reader.into_inner();
                    let _ = socket.write_all(response_str.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, received, gate }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }
}

async fn read_request_head<R: AsyncBufReadExt + Unpin>(reader: &mut R) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) if line == "\r\n" => return,
            Ok(_) => {}
        }
    }
}

/// Backend that echoes selected request headers as JSON.
pub async fn start_echo_backend() -> SocketAddr {
    async fn echo(headers: axum::http::HeaderMap) -> Json<serde_json::Value> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Json(serde_json::json!({
            "host": get("host"),
            "x-forwarded-for": get("x-forwarded-for"),
            "x-forwarded-proto": get("x-forwarded-proto"),
            "x-request-id": get("x-request-id"),
        }))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, Router::new().fallback(echo)).await;
    });
    addr
}

/// Mock external routing source serving `GET /v1/routes`.
#[derive(Clone)]
pub struct MockRoutingApi {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    routes: Arc<Mutex<serde_json::Value>>,
}

impl MockRoutingApi {
    pub async fn start(routes: serde_json::Value) -> Self {
        async fn list(State(api): State<MockRoutingApi>) -> axum::response::Response {
            api.hits.fetch_add(1, Ordering::SeqCst);
            if !api.healthy.load(Ordering::SeqCst) {
                return (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response();
            }
            let routes = api.routes.lock().unwrap().clone();
            Json(routes).into_response()
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api = Self {
            addr: listener.local_addr().unwrap(),
            hits: Arc::new(AtomicUsize::new(0)),
            healthy: Arc::new(AtomicBool::new(true)),
            routes: Arc::new(Mutex::new(routes)),
        };

        let app = Router::new().route("/v1/routes", get(list)).with_state(api.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        api
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_routes(&self, routes: serde_json::Value) {
        *self.routes.lock().unwrap() = routes;
    }
}

/// Listing entry in the routing source's wire format.
pub fn route_entry(host: &str, backend: SocketAddr) -> serde_json::Value {
    serde_json::json!({
        "route": host,
        "ip": backend.ip().to_string(),
        "port": backend.port(),
    })
}

/// Just enough of a NATS server: greets with INFO, records what clients send,
/// and delivers `MSG` frames pushed by the test.
pub struct FakeNats {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    outbound: broadcast::Sender<String>,
    task: JoinHandle<()>,
}

impl FakeNats {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (outbound, _) = broadcast::channel::<String>(64);

        let task = {
            let received = received.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                let mut connections = JoinSet::new();
                while let Ok((socket, _)) = listener.accept().await {
                    let received = received.clone();
                    let mut messages = outbound.subscribe();
                    let (read_half, mut writer) = socket.into_split();

                    connections.spawn(async move {
                        let mut lines = BufReader::new(read_half).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            received.lock().unwrap().push(line.trim_end().to_string());
                        }
                    });
                    connections.spawn(async move {
                        if writer
                            .write_all(b"INFO {\"server_id\":\"fake\",\"max_payload\":1048576}\r\n")
                            .await
                            .is_err()
                        {
                            return;
                        }
                        while let Ok(frame) = messages.recv().await {
                            if writer.write_all(frame.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            })
        };

        Self {
            addr,
            received,
            outbound,
            task,
        }
    }

    /// Deliver a message to every connected client.
    pub fn publish(&self, subject: &str, reply: Option<&str>, payload: &str) {
        let frame = match reply {
            Some(reply) => format!("MSG {} 1 {} {}\r\n{}\r\n", subject, reply, payload.len(), payload),
            None => format!("MSG {} 1 {}\r\n{}\r\n", subject, payload.len(), payload),
        };
        let _ = self.outbound.send(frame);
    }

    /// Lines clients have sent, in order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Wait for a client line starting with `prefix`; returns the line after it (the payload for `PUB`).
    pub async fn wait_for(&self, prefix: &str) -> Option<(String, Option<String>)> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            let lines = self.received();
            if let Some(index) = lines.iter().position(|l| l.starts_with(prefix)) {
                return Some((lines[index].clone(), lines.get(index + 1).cloned()));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        None
    }

    /// Close the listener and every client connection.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// A registration payload in the bus wire format.
pub fn registration(host: &str, backend: SocketAddr, instance: &str) -> String {
    serde_json::json!({
        "host": backend.ip().to_string(),
        "port": backend.port(),
        "uris": [host],
        "app": "test-app",
        "private_instance_id": instance,
        "tags": {"component": "test"},
    })
    .to_string()
}
