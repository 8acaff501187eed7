//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Proxy listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Introspection endpoint settings.
    pub status: StatusConfig,

    /// Message bus servers, tried in order.
    pub nats: Vec<NatsServerConfig>,

    /// Route registry timing.
    pub registry: RegistryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// External routing source.
    pub routing_api: RoutingApiConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Introspection server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Bind address of the status server.
    pub bind_address: String,

    /// Basic auth user for `/routes`.
    pub user: String,

    /// Basic auth password for `/routes`.
    pub pass: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8082".to_string(),
            user: "router-status".to_string(),
            // WARNING: This is a placeholder! Change this in production.
            pass: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// A single NATS server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NatsServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

impl NatsServerConfig {
    /// `host:port` form used for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Registry staleness policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often the stale pruner runs.
    pub prune_interval_secs: u64,

    /// Age after which an announced endpoint is considered stale.
    pub stale_threshold_secs: u64,

    /// Grace period after startup during which nothing is pruned.
    pub start_delay_secs: u64,
}

impl RegistryConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: 30,
            stale_threshold_secs: 120,
            start_delay_secs: 5,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for a backend to produce response headers, in seconds.
    pub endpoint_secs: u64,

    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upper bound on the graceful drain, in seconds.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn endpoint(&self) -> Duration {
        Duration::from_secs(self.endpoint_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            endpoint_secs: 60,
            connect_secs: 5,
            drain_secs: 60,
        }
    }
}

/// Where each polling cycle starts its walk over the candidate hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CandidatePolicy {
    /// Always begin with the first configured host.
    #[default]
    RestartFromFirst,
    /// Begin with the host that answered last cycle, then wrap around.
    Sticky,
}

/// A candidate host of the external routing source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    pub address: String,
    pub port: u16,
}

impl HostConfig {
    /// Listing URL on this host.
    pub fn routes_url(&self) -> String {
        format!("http://{}:{}/v1/routes", self.address, self.port)
    }
}

/// External routing source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingApiConfig {
    /// Candidate hosts in priority order. Empty disables polling.
    pub hosts: Vec<HostConfig>,

    /// Poll period in seconds.
    pub poll_interval_secs: u64,

    /// Per-candidate request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Candidate selection across cycles.
    pub candidate_policy: CandidatePolicy,
}

impl RoutingApiConfig {
    pub fn enabled(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RoutingApiConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            poll_interval_secs: 30,
            request_timeout_ms: 2_000,
            candidate_policy: CandidatePolicy::RestartFromFirst,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Prometheus exporter bind address. Required.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
