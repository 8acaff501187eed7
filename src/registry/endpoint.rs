//! Endpoints and the per-host endpoint pool.
//!
//! # Responsibilities
//! - Normalize routable hostnames
//! - Represent one backend instance with its identity and freshness
//! - Hold the set of endpoints registered for one host
//!
//! # Design Decisions
//! - Identity is (address, private instance id, source); re-registration
//!   refreshes in place
//! - Only addresses that form a valid `host:port` authority are accepted
//! - Pools are plain values; the route table shares them behind `Arc` and
//!   mutates copies, so a reader never sees a pool mid-update

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use axum::http::uri::Authority;
use serde::Serialize;
use tokio::time::Instant;

/// A case-insensitive hostname used as the route table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoutableHost(String);

impl RoutableHost {
    /// Normalize a registered hostname.
    ///
    /// Returns `None` for names that are empty after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    /// Normalize the value of a `Host` header or URI authority, dropping any port.
    pub fn from_authority(raw: &str) -> Option<Self> {
        let authority = Authority::from_str(raw.trim()).ok()?;
        Self::new(authority.host())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutableHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// True when `host:port` can be used as an upstream URI authority.
///
/// Rejects empty hosts, port 0, unbracketed IPv6 literals and anything with
/// characters not allowed in an authority.
pub fn dialable(host: &str, port: u16) -> bool {
    port != 0 && !host.is_empty() && Authority::from_str(&format!("{}:{}", host, port)).is_ok()
}

/// Where an endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// Pushed over the message bus; subject to stale pruning.
    Announced,
    /// Pulled from the external routing source; replaced per poll cycle.
    Polled,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Announced => "announced",
            RouteSource::Polled => "polled",
        }
    }
}

/// Identity of an endpoint within a pool.
///
/// The source is part of the identity: an announcement never replaces a
/// polled entry for the same address, and pruning one leaves the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub address: String,
    pub private_instance_id: String,
    pub source: RouteSource,
}

/// One backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub private_instance_id: String,
    pub app_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub source: RouteSource,
    pub updated_at: Instant,
}

impl Endpoint {
    /// Create an endpoint stamped with the current time.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        private_instance_id: impl Into<String>,
        source: RouteSource,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            private_instance_id: private_instance_id.into(),
            app_id: None,
            tags: BTreeMap::new(),
            source,
            updated_at: Instant::now(),
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// `host:port`, as used for dialing and for introspection output.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            address: self.address(),
            private_instance_id: self.private_instance_id.clone(),
            source: self.source,
        }
    }

    /// True for announced endpoints not refreshed within `threshold`.
    /// Polled endpoints never go stale.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.source == RouteSource::Announced
            && now.saturating_duration_since(self.updated_at) > threshold
    }
}

/// The set of endpoints currently registered for one host.
#[derive(Debug, Clone, Default)]
pub struct EndpointPool {
    endpoints: HashMap<EndpointKey, Endpoint>,
}

impl EndpointPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an endpoint, or refresh the one with the same identity.
    ///
    /// Returns `true` when the endpoint was not present before.
    pub fn upsert(&mut self, endpoint: Endpoint) -> bool {
        self.endpoints.insert(endpoint.key(), endpoint).is_none()
    }

    pub fn remove(&mut self, key: &EndpointKey) -> Option<Endpoint> {
        self.endpoints.remove(key)
    }

    pub fn get(&self, key: &EndpointKey) -> Option<&Endpoint> {
        self.endpoints.get(key)
    }

    pub fn contains(&self, key: &EndpointKey) -> bool {
        self.endpoints.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Uniform random choice among the pool's endpoints.
    pub fn select(&self) -> Option<&Endpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = fastrand::usize(..self.endpoints.len());
        self.endpoints.values().nth(index)
    }

    /// Sorted, deduplicated endpoint addresses.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.endpoints.values().map(Endpoint::address).collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    /// Remove every endpoint matching `predicate`, returning them.
    pub(crate) fn drain_where<F>(&mut self, mut predicate: F) -> Vec<Endpoint>
    where
        F: FnMut(&Endpoint) -> bool,
    {
        let keys: Vec<EndpointKey> = self
            .endpoints
            .iter()
            .filter(|(_, endpoint)| predicate(endpoint))
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter()
            .filter_map(|key| self.endpoints.remove(key))
            .collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.endpoints.values_mut()
    }
}
