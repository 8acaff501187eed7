//! The route table.
//!
//! # Responsibilities
//! - Map routable hosts to endpoint pools
//! - Apply registrations, withdrawals and batches of both
//! - Evict stale announced endpoints in a single pass
//! - Provide consistent snapshots for introspection
//!
//! # Design Decisions
//! - One `RwLock` guards the whole map; there is no other shared routing state
//! - Pools are `Arc`-shared and copied on write, so lookups hand out a pool
//!   without holding the lock and never observe a partial update
//! - An emptied pool is removed immediately

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::registry::endpoint::{Endpoint, EndpointKey, EndpointPool, RoutableHost, RouteSource};

/// A single mutation of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    Register { host: RoutableHost, endpoint: Endpoint },
    Unregister { host: RoutableHost, key: EndpointKey },
}

/// Result of applying a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Added,
    Refreshed,
    Removed,
    /// Withdrawal of an endpoint the table did not know.
    Unknown,
}

/// Counters for a batch of changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub added: usize,
    pub refreshed: usize,
    pub removed: usize,
    pub unknown: usize,
}

impl ApplyReport {
    fn record(&mut self, outcome: ChangeOutcome) {
        match outcome {
            ChangeOutcome::Added => self.added += 1,
            ChangeOutcome::Refreshed => self.refreshed += 1,
            ChangeOutcome::Removed => self.removed += 1,
            ChangeOutcome::Unknown => self.unknown += 1,
        }
    }
}

/// An endpoint evicted by the stale pruner.
#[derive(Debug, Clone)]
pub struct Eviction {
    pub host: RoutableHost,
    pub endpoint: Endpoint,
}

/// Point-in-time view of the table: host → sorted backend addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RouteSnapshot(pub BTreeMap<String, Vec<String>>);

impl RouteSnapshot {
    pub fn get(&self, host: &str) -> Option<&Vec<String>> {
        self.0.get(host)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type Routes = HashMap<RoutableHost, Arc<EndpointPool>>;

/// Host → endpoint pool mapping shared by every component.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Routes>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an endpoint or refresh its timestamp.
    pub fn register(&self, host: &RoutableHost, endpoint: Endpoint) -> ChangeOutcome {
        let mut routes = self.write();
        register_locked(&mut routes, host, endpoint)
    }

    /// Remove an endpoint by identity. Unknown hosts or endpoints are a no-op.
    pub fn unregister(&self, host: &RoutableHost, key: &EndpointKey) -> ChangeOutcome {
        let mut routes = self.write();
        unregister_locked(&mut routes, host, key)
    }

    /// Apply several changes under one write lock.
    pub fn apply<I>(&self, changes: I) -> ApplyReport
    where
        I: IntoIterator<Item = RouteChange>,
    {
        let mut report = ApplyReport::default();
        let mut routes = self.write();
        for change in changes {
            let outcome = match change {
                RouteChange::Register { host, endpoint } => {
                    register_locked(&mut routes, &host, endpoint)
                }
                RouteChange::Unregister { host, key } => {
                    unregister_locked(&mut routes, &host, &key)
                }
            };
            report.record(outcome);
        }
        report
    }

    /// Pool for `host`, if any endpoint is registered.
    pub fn lookup(&self, host: &RoutableHost) -> Option<Arc<EndpointPool>> {
        self.read().get(host).cloned()
    }

    /// Consistent host → addresses view.
    pub fn snapshot(&self) -> RouteSnapshot {
        let pools: Vec<(RoutableHost, Arc<EndpointPool>)> = self
            .read()
            .iter()
            .map(|(host, pool)| (host.clone(), Arc::clone(pool)))
            .collect();

        RouteSnapshot(
            pools
                .into_iter()
                .map(|(host, pool)| (host.as_str().to_string(), pool.addresses()))
                .collect(),
        )
    }

    /// Number of hosts with at least one endpoint.
    pub fn route_count(&self) -> usize {
        self.read().len()
    }

    /// Number of endpoints across all hosts.
    pub fn endpoint_count(&self) -> usize {
        self.read().values().map(|pool| pool.len()).sum()
    }

    /// Evict every announced endpoint older than `threshold`, atomically.
    pub fn prune_stale(&self, now: Instant, threshold: Duration) -> Vec<Eviction> {
        let mut routes = self.write();
        let mut evicted = Vec::new();

        routes.retain(|host, pool| {
            if !pool.iter().any(|endpoint| endpoint.is_stale(now, threshold)) {
                return true;
            }
            let removed = Arc::make_mut(pool).drain_where(|endpoint| endpoint.is_stale(now, threshold));
            evicted.extend(removed.into_iter().map(|endpoint| Eviction {
                host: host.clone(),
                endpoint,
            }));
            !pool.is_empty()
        });

        evicted
    }

    /// Stamp every announced endpoint with `now`.
    ///
    /// Used while the announcement channel is down so that nothing is judged
    /// stale for time it could not have been refreshed in.
    pub fn refresh_announced(&self, now: Instant) -> usize {
        let mut routes = self.write();
        let mut refreshed = 0;
        for pool in routes.values_mut() {
            if !pool.iter().any(|endpoint| endpoint.source == RouteSource::Announced) {
                continue;
            }
            for endpoint in Arc::make_mut(pool).iter_mut() {
                if endpoint.source == RouteSource::Announced {
                    endpoint.updated_at = now;
                    refreshed += 1;
                }
            }
        }
        refreshed
    }

    // A panic while holding the lock leaves the map structurally valid, so
    // poisoning is not propagated.
    fn read(&self) -> RwLockReadGuard<'_, Routes> {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Routes> {
        self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn register_locked(routes: &mut Routes, host: &RoutableHost, endpoint: Endpoint) -> ChangeOutcome {
    let pool = routes.entry(host.clone()).or_default();
    if Arc::make_mut(pool).upsert(endpoint) {
        ChangeOutcome::Added
    } else {
        ChangeOutcome::Refreshed
    }
}

fn unregister_locked(routes: &mut Routes, host: &RoutableHost, key: &EndpointKey) -> ChangeOutcome {
    let Some(pool) = routes.get_mut(host) else {
        return ChangeOutcome::Unknown;
    };
    if !pool.contains(key) {
        return ChangeOutcome::Unknown;
    }

    Arc::make_mut(pool).remove(key);
    if pool.is_empty() {
        routes.remove(host);
    }
    ChangeOutcome::Removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> RoutableHost {
        RoutableHost::new(name).unwrap()
    }

    fn announced(ip: &str, port: u16, at: Instant) -> Endpoint {
        let mut endpoint = Endpoint::new(ip, port, "", RouteSource::Announced);
        endpoint.updated_at = at;
        endpoint
    }

    #[test]
    fn register_is_idempotent() {
        let table = RouteTable::new();
        let now = Instant::now();
        let app = host("app.example.com");

        assert_eq!(table.register(&app, announced("10.0.0.1", 80, now)), ChangeOutcome::Added);
        assert_eq!(table.register(&app, announced("10.0.0.1", 80, now)), ChangeOutcome::Refreshed);

        assert_eq!(table.route_count(), 1);
        assert_eq!(table.endpoint_count(), 1);
    }

    #[test]
    fn last_unregister_removes_host() {
        let table = RouteTable::new();
        let app = host("app.example.com");
        let endpoint = announced("10.0.0.1", 80, Instant::now());

        table.register(&app, endpoint.clone());
        assert_eq!(table.unregister(&app, &endpoint.key()), ChangeOutcome::Removed);

        assert!(table.lookup(&app).is_none());
        assert_eq!(table.route_count(), 0);
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn unknown_withdrawals_are_noops() {
        let table = RouteTable::new();
        let app = host("app.example.com");
        let endpoint = announced("10.0.0.1", 80, Instant::now());

        assert_eq!(table.unregister(&app, &endpoint.key()), ChangeOutcome::Unknown);

        table.register(&app, endpoint);
        let other = announced("10.0.0.2", 80, Instant::now());
        assert_eq!(table.unregister(&app, &other.key()), ChangeOutcome::Unknown);
        assert_eq!(table.endpoint_count(), 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = RouteTable::new();
        table.register(&host("App.Example.COM"), announced("10.0.0.1", 80, Instant::now()));

        let pool = table.lookup(&host("app.example.com")).unwrap();
        assert_eq!(pool.addresses(), vec!["10.0.0.1:80".to_string()]);
    }

    #[test]
    fn lookup_result_is_unaffected_by_later_writes() {
        let table = RouteTable::new();
        let app = host("app.example.com");
        table.register(&app, announced("10.0.0.1", 80, Instant::now()));

        let before = table.lookup(&app).unwrap();
        table.register(&app, announced("10.0.0.2", 80, Instant::now()));

        assert_eq!(before.len(), 1);
        assert_eq!(table.lookup(&app).unwrap().len(), 2);
    }

    #[test]
    fn prune_evicts_only_stale_announced_endpoints() {
        let table = RouteTable::new();
        let start = Instant::now();
        let threshold = Duration::from_secs(2);

        let zombie = host("zombie.vcap.me");
        let running = host("innocent.bystander.vcap.me");
        let polled = host("da-route.vcap.me");

        table.register(&zombie, announced("10.0.0.1", 80, start));
        table.register(&running, announced("10.0.0.2", 80, start));
        let mut from_api = Endpoint::new("10.0.0.3", 80, "", RouteSource::Polled);
        from_api.updated_at = start;
        table.register(&polled, from_api);

        // running re-announced before the tick
        table.register(&running, announced("10.0.0.2", 80, start + Duration::from_secs(2)));

        let evicted = table.prune_stale(start + Duration::from_secs(3), threshold);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].host, zombie);
        assert!(table.lookup(&zombie).is_none());
        assert!(table.lookup(&running).is_some());
        assert!(table.lookup(&polled).is_some());
    }

    #[test]
    fn pruning_an_announcement_keeps_the_polled_entry_for_the_same_backend() {
        let table = RouteTable::new();
        let start = Instant::now();
        let shared = host("shared.example.com");

        let mut from_api = Endpoint::new("10.0.0.9", 80, "", RouteSource::Polled);
        from_api.updated_at = start;
        table.register(&shared, from_api);
        assert_eq!(table.register(&shared, announced("10.0.0.9", 80, start)), ChangeOutcome::Added);

        let evicted = table.prune_stale(start + Duration::from_secs(5), Duration::from_secs(1));

        assert_eq!(evicted.len(), 1);
        let pool = table.lookup(&shared).expect("polled entry must survive pruning");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.select().unwrap().source, RouteSource::Polled);
    }

    #[test]
    fn prune_keeps_fresh_endpoints_in_mixed_pool() {
        let table = RouteTable::new();
        let start = Instant::now();
        let app = host("app.example.com");

        table.register(&app, announced("10.0.0.1", 80, start));
        table.register(&app, announced("10.0.0.2", 80, start + Duration::from_secs(5)));

        let evicted = table.prune_stale(start + Duration::from_secs(6), Duration::from_secs(2));

        assert_eq!(evicted.len(), 1);
        assert_eq!(table.lookup(&app).unwrap().addresses(), vec!["10.0.0.2:80".to_string()]);
    }

    #[test]
    fn refresh_protects_from_pruning() {
        let table = RouteTable::new();
        let start = Instant::now();
        let app = host("app.example.com");
        table.register(&app, announced("10.0.0.1", 80, start));

        let later = start + Duration::from_secs(10);
        assert_eq!(table.refresh_announced(later), 1);
        assert!(table.prune_stale(later + Duration::from_secs(1), Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn apply_reports_each_change() {
        let table = RouteTable::new();
        let now = Instant::now();
        let app = host("app.example.com");
        let old = announced("10.0.0.1", 80, now);
        table.register(&app, old.clone());

        let report = table.apply(vec![
            RouteChange::Unregister { host: app.clone(), key: old.key() },
            RouteChange::Register { host: app.clone(), endpoint: announced("10.0.0.2", 80, now) },
            RouteChange::Unregister { host: host("ghost.example.com"), key: old.key() },
        ]);

        assert_eq!(report, ApplyReport { added: 1, refreshed: 0, removed: 1, unknown: 1 });
        assert_eq!(table.snapshot().get("app.example.com").unwrap(), &vec!["10.0.0.2:80".to_string()]);
    }

    #[test]
    fn snapshot_serializes_as_object() {
        let table = RouteTable::new();
        table.register(&host("b.example.com"), announced("10.0.0.2", 81, Instant::now()));
        table.register(&host("a.example.com"), announced("10.0.0.1", 80, Instant::now()));

        let json = serde_json::to_string(&table.snapshot()).unwrap();
        assert_eq!(json, r#"{"a.example.com":["10.0.0.1:80"],"b.example.com":["10.0.0.2:81"]}"#);
    }

    #[test]
    fn concurrent_access() {
        use std::thread;

        let table = Arc::new(RouteTable::new());
        let mut handles = vec![];

        for i in 0..8u16 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                let app = RoutableHost::new(&format!("app{}.example.com", i % 2)).unwrap();
                for port in 0..100u16 {
                    let endpoint = Endpoint::new("10.0.0.1", i * 1000 + port, "", RouteSource::Announced);
                    table.register(&app, endpoint.clone());
                    let _ = table.lookup(&app);
                    table.unregister(&app, &endpoint.key());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.route_count(), 0);
    }
}
