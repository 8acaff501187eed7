//! Registry updater.
//!
//! # Responsibilities
//! - Consume announce/withdraw events from the message bus
//! - Consume polled batches from the external route poller
//! - Apply each event to the route table, in arrival order
//!
//! # Design Decisions
//! - One task, one queue: events from a single source keep their order
//! - Parsing happens upstream; this loop only sees well-formed events

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::observability::metrics;
use crate::registry::endpoint::{Endpoint, RoutableHost};
use crate::registry::table::{ApplyReport, ChangeOutcome, RouteChange, RouteTable};

/// Whether an event adds or removes the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Announce,
    Withdraw,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Announce => "announce",
            Action::Withdraw => "withdraw",
        }
    }
}

/// One endpoint announced or withdrawn for one or more hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub action: Action,
    pub hosts: Vec<RoutableHost>,
    pub endpoint: Endpoint,
}

impl RegistryEvent {
    /// Expand into one table change per host.
    pub fn into_changes(self) -> Vec<RouteChange> {
        let RegistryEvent { action, hosts, endpoint } = self;
        match action {
            Action::Announce => hosts
                .into_iter()
                .map(|host| RouteChange::Register { host, endpoint: endpoint.clone() })
                .collect(),
            Action::Withdraw => {
                let key = endpoint.key();
                hosts
                    .into_iter()
                    .map(|host| RouteChange::Unregister { host, key: key.clone() })
                    .collect()
            }
        }
    }
}

/// Input accepted by the updater.
#[derive(Debug, Clone)]
pub enum RegistryUpdate {
    /// Pushed over the message bus.
    Event(RegistryEvent),
    /// A polled diff, applied as one batch.
    Polled(Vec<RouteChange>),
}

/// Applies registry updates to the route table.
#[derive(Debug, Clone)]
pub struct RegistryUpdater {
    table: Arc<RouteTable>,
}

impl RegistryUpdater {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    /// Apply one update synchronously.
    pub fn apply(&self, update: RegistryUpdate) -> ApplyReport {
        let report = match update {
            RegistryUpdate::Event(event) => self.apply_event(event),
            RegistryUpdate::Polled(changes) => {
                let report = self.table.apply(changes);
                tracing::debug!(
                    added = report.added,
                    removed = report.removed,
                    unknown = report.unknown,
                    "Applied polled routes"
                );
                report
            }
        };
        metrics::set_route_count(self.table.route_count());
        report
    }

    fn apply_event(&self, event: RegistryEvent) -> ApplyReport {
        let action = event.action;
        let address = event.endpoint.address();
        metrics::record_registry_message(action.as_str());

        let mut report = ApplyReport::default();
        for change in event.into_changes() {
            let host = match &change {
                RouteChange::Register { host, .. } | RouteChange::Unregister { host, .. } => host.clone(),
            };
            let outcome = match change {
                RouteChange::Register { host, endpoint } => self.table.register(&host, endpoint),
                RouteChange::Unregister { host, key } => self.table.unregister(&host, &key),
            };

            match outcome {
                ChangeOutcome::Added => {
                    tracing::info!(host = %host, address = %address, "Endpoint registered");
                    report.added += 1;
                }
                ChangeOutcome::Refreshed => {
                    tracing::trace!(host = %host, address = %address, "Endpoint refreshed");
                    report.refreshed += 1;
                }
                ChangeOutcome::Removed => {
                    tracing::info!(host = %host, address = %address, "Endpoint unregistered");
                    report.removed += 1;
                }
                ChangeOutcome::Unknown => {
                    // Usually a withdrawal racing an earlier eviction.
                    tracing::debug!(host = %host, address = %address, "Withdrawal for unknown endpoint");
                    report.unknown += 1;
                }
            }
        }
        report
    }

    /// Consume updates until the channel closes or shutdown fires.
    pub async fn run(
        self,
        mut updates: mpsc::Receiver<RegistryUpdate>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Registry updater starting");
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => {
                        self.apply(update);
                    }
                    None => {
                        tracing::info!("All registry sources closed, updater exiting");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Registry updater received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
