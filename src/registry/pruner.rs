//! Stale endpoint pruning.
//!
//! # Responsibilities
//! - Periodically evict announced endpoints that stopped refreshing
//! - Hold off entirely during the startup grace period
//! - Suspend eviction while the announcement channel is down
//!
//! # Design Decisions
//! - Polled endpoints are never evicted here; the poller replaces them
//! - Each tick is one table operation, so lookups see all or none of it
//! - A suspended tick refreshes announced timestamps instead of evicting

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::observability::metrics;
use crate::registry::table::RouteTable;

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stale endpoints were evicted (possibly zero).
    Pruned(usize),
    /// The announcement channel is down; timestamps were refreshed instead.
    Suspended(usize),
}

/// Periodic stale-endpoint evictor.
pub struct StalePruner {
    table: Arc<RouteTable>,
    interval: Duration,
    threshold: Duration,
    start_delay: Duration,
    started_at: Instant,
    transport_up: watch::Receiver<bool>,
}

impl StalePruner {
    /// `transport_up` reports whether the announcement channel is connected.
    pub fn new(
        table: Arc<RouteTable>,
        interval: Duration,
        threshold: Duration,
        start_delay: Duration,
        transport_up: watch::Receiver<bool>,
    ) -> Self {
        Self {
            table,
            interval,
            threshold,
            start_delay,
            started_at: Instant::now(),
            transport_up,
        }
    }

    /// Run one pruning pass at `now`.
    pub fn tick(&self, now: Instant) -> TickOutcome {
        if !*self.transport_up.borrow() {
            let refreshed = self.table.refresh_announced(now);
            tracing::info!(refreshed, "Announcement channel down, pruning suspended");
            return TickOutcome::Suspended(refreshed);
        }

        let evicted = self.table.prune_stale(now, self.threshold);
        for eviction in &evicted {
            tracing::info!(
                host = %eviction.host,
                address = %eviction.endpoint.address(),
                age_ms = now.saturating_duration_since(eviction.endpoint.updated_at).as_millis() as u64,
                "Pruned stale endpoint"
            );
        }
        if !evicted.is_empty() {
            metrics::record_pruned(evicted.len());
            metrics::set_route_count(self.table.route_count());
        }
        TickOutcome::Pruned(evicted.len())
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            threshold_ms = self.threshold.as_millis() as u64,
            start_delay_ms = self.start_delay.as_millis() as u64,
            "Stale pruner starting"
        );

        tokio::select! {
            _ = time::sleep_until(self.started_at + self.start_delay) => {}
            _ = shutdown.recv() => return,
        }

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                now = ticker.tick() => {
                    self.tick(now);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Stale pruner received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
