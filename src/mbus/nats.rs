//! Minimal NATS subscriber.
//!
//! # Responsibilities
//! - Connect to the first reachable configured server
//! - Subscribe to registration subjects and forward decoded events
//! - Announce the router on every (re)connect and answer greetings
//! - Report connectivity so pruning can be suspended during outages
//!
//! # Design Decisions
//! - Text protocol over a plain `TcpStream`; no TLS, no JetStream
//! - Malformed payloads are dropped one by one; the read loop keeps going
//! - Reconnects cycle through servers with capped exponential backoff
//! - Payload sizes are bounded by the server's advertised `max_payload`
//! - A silent server is pinged; unanswered pings end the session

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

use crate::config::NatsServerConfig;
use crate::mbus::message::{RegistryMessage, RouterStart};
use crate::observability::metrics;
use crate::registry::{Action, RegistryUpdate};
use crate::resilience::backoff::Backoff;

pub const REGISTER_SUBJECT: &str = "router.register";
pub const UNREGISTER_SUBJECT: &str = "router.unregister";
pub const GREET_SUBJECT: &str = "router.greet";
pub const START_SUBJECT: &str = "router.start";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Used when `INFO` does not advertise `max_payload`.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;
/// Upper bound on any advertised `max_payload`.
pub const MAX_PAYLOAD_LIMIT: usize = 64 * 1024 * 1024;

/// Idle time before the client pings the server.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);
const MAX_PINGS_OUTSTANDING: u32 = 2;

/// Errors on a bus session. All of them end the session and trigger a reconnect.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("server closed the connection")]
    Eof,

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("no answer to {0} pings")]
    Unresponsive(u32),

    #[error("registry updater is gone")]
    UpdaterClosed,
}

/// A parsed server-to-client protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Info(String),
    Msg {
        subject: String,
        sid: String,
        reply: Option<String>,
        size: usize,
    },
    Ping,
    Pong,
    Ack,
    Error(String),
}

/// The part of the server's `INFO` this client cares about.
#[derive(Debug, Default, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    max_payload: Option<usize>,
}

/// Payload limit advertised in an `INFO` body, clamped to [`MAX_PAYLOAD_LIMIT`].
pub fn max_payload(info: &str) -> usize {
    serde_json::from_str::<ServerInfo>(info)
        .ok()
        .and_then(|info| info.max_payload)
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_MAX_PAYLOAD)
        .min(MAX_PAYLOAD_LIMIT)
}

/// Bytes to read for a `MSG` payload of `size`, including the trailing CRLF.
pub fn payload_frame_len(size: usize, limit: usize) -> Result<usize, BusError> {
    if size > limit {
        return Err(BusError::PayloadTooLarge { size, limit });
    }
    size.checked_add(2).ok_or(BusError::PayloadTooLarge { size, limit })
}

/// Parse one control line (without payload).
pub fn parse_op(line: &str) -> Result<ServerOp, BusError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (op, rest) = match line.split_once(' ') {
        Some((op, rest)) => (op, rest.trim()),
        None => (line, ""),
    };

    match op.to_ascii_uppercase().as_str() {
        "INFO" => Ok(ServerOp::Info(rest.to_string())),
        "MSG" => {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            let (subject, sid, reply, size) = match parts.as_slice() {
                [subject, sid, size] => (subject, sid, None, size),
                [subject, sid, reply, size] => (subject, sid, Some(reply.to_string()), size),
                _ => return Err(BusError::Protocol(format!("malformed MSG line '{}'", line))),
            };
            let size = size
                .parse()
                .map_err(|_| BusError::Protocol(format!("bad payload size in '{}'", line)))?;
            Ok(ServerOp::Msg {
                subject: subject.to_string(),
                sid: sid.to_string(),
                reply,
                size,
            })
        }
        "PING" => Ok(ServerOp::Ping),
        "PONG" => Ok(ServerOp::Pong),
        "+OK" => Ok(ServerOp::Ack),
        "-ERR" => Ok(ServerOp::Error(rest.trim_matches('\'').to_string())),
        other => Err(BusError::Protocol(format!("unexpected operation '{}'", other))),
    }
}

/// Subscribes to registration subjects and feeds the registry updater.
pub struct NatsSubscriber {
    servers: Vec<NatsServerConfig>,
    start: RouterStart,
    updates: mpsc::Sender<RegistryUpdate>,
    connected: watch::Sender<bool>,
    ping_interval: Duration,
}

impl NatsSubscriber {
    /// `start` is published on each connect; its `hosts` is filled in per session.
    ///
    /// Returns the subscriber and a receiver tracking connectivity.
    pub fn new(
        servers: Vec<NatsServerConfig>,
        start: RouterStart,
        updates: mpsc::Sender<RegistryUpdate>,
    ) -> (Self, watch::Receiver<bool>) {
        let (connected, connected_rx) = watch::channel(false);
        (
            Self {
                servers,
                start,
                updates,
                connected,
                ping_interval: PING_INTERVAL,
            },
            connected_rx,
        )
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.servers.is_empty() {
            tracing::warn!("No message bus servers configured");
            return;
        }

        let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_MAX);
        let mut index = 0;
        loop {
            let server = &self.servers[index % self.servers.len()];
            index += 1;

            let result = tokio::select! {
                result = self.session(server) => result,
                _ = shutdown.recv() => {
                    tracing::info!("Message bus subscriber received shutdown signal, exiting loop");
                    break;
                }
            };

            let was_connected = self.connected.send_replace(false);
            match result {
                Ok(()) => return,
                Err(BusError::UpdaterClosed) => {
                    tracing::info!("Registry updater closed, message bus subscriber exiting");
                    return;
                }
                Err(e) => {
                    if was_connected {
                        backoff.reset();
                        tracing::warn!(server = %server.address(), error = %e, "Message bus connection lost");
                    } else {
                        tracing::warn!(server = %server.address(), error = %e, "Message bus connect failed");
                    }
                }
            }

            // back off once every server in the list has been tried
            if index % self.servers.len() == 0 {
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => break,
                }
            }
        }
    }

    async fn session(&self, server: &NatsServerConfig) -> Result<(), BusError> {
        let address = server.address();
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| BusError::ConnectTimeout(address.clone()))??;
        let local_ip = stream.local_addr()?.ip();

        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let limit = match parse_op(&next_line(&mut lines).await?)? {
            ServerOp::Info(info) => max_payload(&info),
            other => return Err(BusError::Protocol(format!("expected INFO, got {:?}", other))),
        };

        let connect = serde_json::json!({
            "verbose": false,
            "pedantic": false,
            "name": "dynamic-router",
            "lang": "rust",
            "version": env!("CARGO_PKG_VERSION"),
            "user": server.user,
            "pass": server.pass,
        });
        writer.write_all(format!("CONNECT {}\r\n", connect).as_bytes()).await?;
        writer
            .write_all(
                format!(
                    "SUB {} 1\r\nSUB {} 2\r\nSUB {} 3\r\n",
                    REGISTER_SUBJECT, UNREGISTER_SUBJECT, GREET_SUBJECT
                )
                .as_bytes(),
            )
            .await?;

        let mut start = self.start.clone();
        start.hosts = vec![local_ip.to_string()];
        let start_payload = serde_json::to_vec(&start).map_err(|e| BusError::Protocol(e.to_string()))?;
        publish(&mut writer, START_SUBJECT, &start_payload).await?;

        self.connected.send_replace(true);
        tracing::info!(server = %address, max_payload = limit, "Message bus connected");

        let mut pings_outstanding = 0;
        loop {
            // `next_line` is cancel safe, so a timed-out read loses nothing
            let line = match timeout(self.ping_interval, next_line(&mut lines)).await {
                Ok(line) => line?,
                Err(_) => {
                    if pings_outstanding >= MAX_PINGS_OUTSTANDING {
                        return Err(BusError::Unresponsive(pings_outstanding));
                    }
                    writer.write_all(b"PING\r\n").await?;
                    pings_outstanding += 1;
                    continue;
                }
            };
            pings_outstanding = 0;
            if line.trim().is_empty() {
                continue;
            }

            match parse_op(&line)? {
                ServerOp::Msg { subject, reply, size, .. } => {
                    let mut payload = vec![0u8; payload_frame_len(size, limit)?];
                    lines.get_mut().read_exact(&mut payload).await?;
                    payload.truncate(size);
                    self.handle_message(&mut writer, &subject, reply.as_deref(), &payload, &start_payload)
                        .await?;
                }
                ServerOp::Ping => writer.write_all(b"PONG\r\n").await?,
                ServerOp::Error(message) => return Err(BusError::Server(message)),
                ServerOp::Info(_) | ServerOp::Pong | ServerOp::Ack => {}
            }
        }
    }

    async fn handle_message(
        &self,
        writer: &mut OwnedWriteHalf,
        subject: &str,
        reply: Option<&str>,
        payload: &[u8],
        start_payload: &[u8],
    ) -> Result<(), BusError> {
        let action = match subject {
            REGISTER_SUBJECT => Action::Announce,
            UNREGISTER_SUBJECT => Action::Withdraw,
            GREET_SUBJECT => {
                if let Some(reply) = reply {
                    publish(writer, reply, start_payload).await?;
                }
                return Ok(());
            }
            other => {
                tracing::debug!(subject = %other, "Ignoring message on unexpected subject");
                return Ok(());
            }
        };

        let event = match RegistryMessage::from_slice(payload).and_then(|m| m.into_event(action)) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    subject = %subject,
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping malformed registry message"
                );
                metrics::record_malformed_message(subject);
                return Ok(());
            }
        };

        self.updates
            .send(RegistryUpdate::Event(event))
            .await
            .map_err(|_| BusError::UpdaterClosed)
    }
}

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<String, BusError> {
    lines.next_line().await?.ok_or(BusError::Eof)
}

async fn publish(writer: &mut OwnedWriteHalf, subject: &str, payload: &[u8]) -> Result<(), BusError> {
    writer
        .write_all(format!("PUB {} {}\r\n", subject, payload.len()).as_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.write_all(b"\r\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn start_message() -> RouterStart {
        RouterStart {
            id: "router-test".into(),
            hosts: Vec::new(),
            minimum_register_interval_secs: 20,
            prune_threshold_secs: 120,
        }
    }

    /// A server that sends `frames` after accepting and then stays silent,
    /// draining whatever the client writes.
    async fn scripted_server(frames: &'static str) -> NatsServerConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut read_half, mut write_half) = socket.into_split();
                    let _ = write_half.write_all(frames.as_bytes()).await;
                    let mut sink = Vec::new();
                    let _ = read_half.read_to_end(&mut sink).await;
                    drop(write_half);
                });
            }
        });
        NatsServerConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            user: String::new(),
            pass: String::new(),
        }
    }

    fn subscriber(server: &NatsServerConfig) -> (NatsSubscriber, watch::Receiver<bool>, mpsc::Receiver<RegistryUpdate>) {
        let (updates, updates_rx) = mpsc::channel(8);
        let (subscriber, connected) = NatsSubscriber::new(vec![server.clone()], start_message(), updates);
        (subscriber, connected, updates_rx)
    }

    #[test]
    fn max_payload_follows_info() {
        assert_eq!(max_payload(r#"{"server_id":"x","max_payload":4096}"#), 4096);
        assert_eq!(max_payload(r#"{"server_id":"x"}"#), DEFAULT_MAX_PAYLOAD);
        assert_eq!(max_payload("{}"), DEFAULT_MAX_PAYLOAD);
        assert_eq!(max_payload("not json"), DEFAULT_MAX_PAYLOAD);
        assert_eq!(max_payload(r#"{"max_payload":0}"#), DEFAULT_MAX_PAYLOAD);
        assert_eq!(max_payload(&format!(r#"{{"max_payload":{}}}"#, usize::MAX)), MAX_PAYLOAD_LIMIT);
    }

    #[test]
    fn payload_frame_len_is_bounded() {
        assert_eq!(payload_frame_len(0, 1024).unwrap(), 2);
        assert_eq!(payload_frame_len(1024, 1024).unwrap(), 1026);
        assert!(matches!(
            payload_frame_len(1025, 1024),
            Err(BusError::PayloadTooLarge { size: 1025, limit: 1024 })
        ));
        assert!(matches!(
            payload_frame_len(usize::MAX, usize::MAX),
            Err(BusError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_msg_ends_the_session() {
        let server = scripted_server("INFO {}\r\nMSG router.register 1 18446744073709551615\r\n").await;
        let (subscriber, _connected, _updates) = subscriber(&server);

        let result = timeout(Duration::from_secs(5), subscriber.session(&server)).await.unwrap();
        assert!(matches!(result, Err(BusError::PayloadTooLarge { .. })), "got {:?}", result);
    }

    #[tokio::test]
    async fn msg_above_advertised_limit_ends_the_session() {
        let server = scripted_server("INFO {\"max_payload\":16}\r\nMSG router.register 1 17\r\n").await;
        let (subscriber, _connected, _updates) = subscriber(&server);

        let result = timeout(Duration::from_secs(5), subscriber.session(&server)).await.unwrap();
        assert!(matches!(result, Err(BusError::PayloadTooLarge { size: 17, limit: 16 })), "got {:?}", result);
    }

    #[tokio::test]
    async fn oversized_msg_marks_bus_down_and_subscriber_keeps_running() {
        let server = scripted_server("INFO {}\r\nMSG router.register 1 18446744073709551615\r\n").await;
        let (subscriber, mut connected, _updates) = subscriber(&server);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(subscriber.run(shutdown_rx));

        // the session came up at least once, then the flag went back down
        timeout(Duration::from_secs(5), connected.changed()).await.unwrap().unwrap();
        timeout(Duration::from_secs(5), connected.wait_for(|up| !*up)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished(), "subscriber stopped instead of reconnecting");

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_server_is_dropped_after_unanswered_pings() {
        let server = scripted_server("INFO {}\r\n").await;
        let (subscriber, _connected, _updates) = subscriber(&server);
        let subscriber = subscriber.with_ping_interval(Duration::from_millis(50));

        let result = timeout(Duration::from_secs(5), subscriber.session(&server)).await.unwrap();
        assert!(
            matches!(result, Err(BusError::Unresponsive(n)) if n == MAX_PINGS_OUTSTANDING),
            "got {:?}",
            result
        );
    }

    #[test]
    fn parses_msg_with_and_without_reply() {
        assert_eq!(
            parse_op("MSG router.register 1 42\r\n").unwrap(),
            ServerOp::Msg {
                subject: "router.register".into(),
                sid: "1".into(),
                reply: None,
                size: 42,
            }
        );
        assert_eq!(
            parse_op("MSG router.greet 3 _INBOX.abc 0\r\n").unwrap(),
            ServerOp::Msg {
                subject: "router.greet".into(),
                sid: "3".into(),
                reply: Some("_INBOX.abc".into()),
                size: 0,
            }
        );
    }

    #[test]
    fn parses_control_lines() {
        assert_eq!(parse_op("PING\r\n").unwrap(), ServerOp::Ping);
        assert_eq!(parse_op("pong\r\n").unwrap(), ServerOp::Pong);
        assert_eq!(parse_op("+OK\r\n").unwrap(), ServerOp::Ack);
        assert_eq!(
            parse_op("-ERR 'Authorization Violation'\r\n").unwrap(),
            ServerOp::Error("Authorization Violation".into())
        );
        assert!(matches!(parse_op("INFO {\"server_id\":\"x\"}\r\n").unwrap(), ServerOp::Info(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_op("MSG only-subject\r\n"), Err(BusError::Protocol(_))));
        assert!(matches!(parse_op("MSG a 1 notanumber\r\n"), Err(BusError::Protocol(_))));
        assert!(matches!(parse_op("HELLO\r\n"), Err(BusError::Protocol(_))));
    }
}
