//! External routing source poller.
//!
//! # Responsibilities
//! - Query candidate hosts in order until one answers
//! - Diff the answer against the routes applied last time
//! - Hand the diff to the registry updater as one batch
//!
//! # Design Decisions
//! - Fail-safe: a cycle where no host answers changes nothing
//! - One successful answer per cycle; no fan-out to remaining hosts
//! - Per-host attempts are bounded so a dead host cannot stall a cycle

use axum::body::Bytes;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, timeout, MissedTickBehavior};

use crate::config::{CandidatePolicy, HostConfig, RoutingApiConfig};
use crate::observability::metrics;
use crate::registry::{RegistryUpdate, RouteChange};
use crate::routing_api::types::{parse_listing, PolledRoute};

/// Why a poll cycle was abandoned.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("no routing source hosts configured")]
    NoHosts,

    #[error("all {0} routing source hosts failed")]
    AllHostsFailed(usize),

    #[error("routing source {host} returned an unreadable listing: {source}")]
    Malformed {
        host: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("registry updater is gone")]
    UpdaterClosed,
}

/// What a successful cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Index of the host that answered.
    pub host_index: usize,
    pub announced: usize,
    pub withdrawn: usize,
    pub skipped: usize,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("timed out")]
    Timeout,
}

/// Periodically merges the external route listing into the registry.
pub struct RoutePoller {
    client: reqwest::Client,
    hosts: Vec<HostConfig>,
    interval: Duration,
    request_timeout: Duration,
    policy: CandidatePolicy,
    preferred: usize,
    applied: BTreeSet<PolledRoute>,
    updates: mpsc::Sender<RegistryUpdate>,
}

impl RoutePoller {
    pub fn new(config: &RoutingApiConfig, updates: mpsc::Sender<RegistryUpdate>) -> Self {
        Self {
            client: reqwest::Client::new(),
            hosts: config.hosts.clone(),
            interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
            policy: config.candidate_policy,
            preferred: 0,
            applied: BTreeSet::new(),
            updates,
        }
    }

    /// Routes applied by the last successful cycle.
    pub fn applied(&self) -> &BTreeSet<PolledRoute> {
        &self.applied
    }

    /// Host indices in the order this cycle will try them.
    pub fn walk_order(&self) -> Vec<usize> {
        let count = self.hosts.len();
        let start = match self.policy {
            CandidatePolicy::RestartFromFirst => 0,
            CandidatePolicy::Sticky => self.preferred % count.max(1),
        };
        (0..count).map(|offset| (start + offset) % count).collect()
    }

    /// Changes that turn `previous` into `current`: withdrawals first.
    pub fn diff(previous: &BTreeSet<PolledRoute>, current: &BTreeSet<PolledRoute>) -> Vec<RouteChange> {
        previous
            .difference(current)
            .map(PolledRoute::unregister)
            .chain(current.difference(previous).map(PolledRoute::register))
            .collect()
    }

    /// Run one cycle.
    pub async fn poll_once(&mut self) -> Result<PollReport, PollError> {
        if self.hosts.is_empty() {
            return Err(PollError::NoHosts);
        }

        let (host_index, body) = self.fetch().await?;
        let (routes, skipped) = parse_listing(&body).map_err(|source| PollError::Malformed {
            host: self.hosts[host_index].routes_url(),
            source,
        })?;
        if skipped > 0 {
            tracing::warn!(skipped, "Skipped malformed routing source entries");
        }

        let current: BTreeSet<PolledRoute> = routes.into_iter().collect();
        let changes = Self::diff(&self.applied, &current);
        let withdrawn = self.applied.difference(&current).count();
        let announced = changes.len() - withdrawn;

        if !changes.is_empty() {
            self.updates
                .send(RegistryUpdate::Polled(changes))
                .await
                .map_err(|_| PollError::UpdaterClosed)?;
        }
        self.applied = current;
        self.preferred = host_index;

        Ok(PollReport {
            host_index,
            announced,
            withdrawn,
            skipped,
        })
    }

    async fn fetch(&self) -> Result<(usize, Bytes), PollError> {
        for index in self.walk_order() {
            let url = self.hosts[index].routes_url();
            match self.attempt(&url).await {
                Ok(body) => return Ok((index, body)),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Routing source unavailable, trying next host");
                }
            }
        }
        Err(PollError::AllHostsFailed(self.hosts.len()))
    }

    async fn attempt(&self, url: &str) -> Result<Bytes, AttemptError> {
        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AttemptError::Status(status));
            }
            Ok(response.bytes().await?)
        };

        match timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            hosts = self.hosts.len(),
            interval_ms = self.interval.as_millis() as u64,
            policy = ?self.policy,
            "Route poller starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(report) => {
                            metrics::record_poll("success");
                            if report.announced > 0 || report.withdrawn > 0 {
                                tracing::info!(
                                    host_index = report.host_index,
                                    announced = report.announced,
                                    withdrawn = report.withdrawn,
                                    "Polled routes updated"
                                );
                            }
                        }
                        Err(PollError::UpdaterClosed) => {
                            tracing::info!("Registry updater closed, route poller exiting");
                            break;
                        }
                        Err(e) => {
                            metrics::record_poll("failure");
                            tracing::warn!(error = %e, "Poll cycle abandoned, keeping previous routes");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Route poller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
