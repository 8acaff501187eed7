//! Routing source wire types.

use serde::{Deserialize, Serialize};

use crate::registry::endpoint::dialable;
use crate::registry::{Endpoint, RoutableHost, RouteChange, RouteSource};

/// One entry of a `GET /v1/routes` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteEntry {
    pub route: String,
    pub ip: String,
    pub port: u16,
}

/// A normalized polled route: (host, ip, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolledRoute {
    pub host: RoutableHost,
    pub ip: String,
    pub port: u16,
}

impl PolledRoute {
    pub fn from_entry(entry: RouteEntry) -> Option<Self> {
        let host = RoutableHost::new(&entry.route)?;
        let ip = entry.ip.trim();
        if !dialable(ip, entry.port) {
            return None;
        }
        Some(Self {
            host,
            ip: ip.to_string(),
            port: entry.port,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip.clone(), self.port, "", RouteSource::Polled)
    }

    pub fn register(&self) -> RouteChange {
        RouteChange::Register {
            host: self.host.clone(),
            endpoint: self.endpoint(),
        }
    }

    pub fn unregister(&self) -> RouteChange {
        RouteChange::Unregister {
            host: self.host.clone(),
            key: self.endpoint().key(),
        }
    }
}

/// Decode a listing body.
///
/// The body must be a JSON array; entries that fail to decode are skipped and
/// counted.
pub fn parse_listing(body: &[u8]) -> Result<(Vec<PolledRoute>, usize), serde_json::Error> {
    let items: Vec<serde_json::Value> = serde_json::from_slice(body)?;
    let mut routes = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        match serde_json::from_value::<RouteEntry>(item).ok().and_then(PolledRoute::from_entry) {
            Some(route) => routes.push(route),
            None => skipped += 1,
        }
    }
    Ok((routes, skipped))
}
