//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind both listeners before spawning anything (fail fast)
//! - Wire the route table into updater, pruner, bus subscriber and poller
//! - Start the status and proxy servers
//! - Hand back a [`RunningRouter`] that drives the drain to completion
//!
//! # Design Decisions
//! - Any startup error is fatal; once serving, nothing unwinds the process
//! - Every background task watches one shutdown broadcast

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::http::{serve_status, status_router, AppState, BasicCredentials, ProxyServer, StatusState};
use crate::lifecycle::drain::{DrainCoordinator, DrainOutcome, LifecycleEvent};
use crate::lifecycle::shutdown::Shutdown;
use crate::mbus::{NatsSubscriber, RouterStart};
use crate::net::{Listener, ListenerError};
use crate::registry::{RegistryUpdate, RegistryUpdater, RouteTable, StalePruner};
use crate::routing_api::RoutePoller;

const UPDATE_QUEUE_DEPTH: usize = 1024;
const TASK_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("proxy listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("failed to bind status listener on {address}: {source}")]
    StatusBind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// A router that has bound its listeners and is serving.
pub struct RunningRouter {
    proxy_addr: SocketAddr,
    status_addr: SocketAddr,
    table: Arc<RouteTable>,
    drain: Arc<DrainCoordinator>,
    flush_grace: Duration,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    events_rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    updates: mpsc::Sender<RegistryUpdate>,
    shutdown: Shutdown,
    tasks: JoinSet<()>,
    proxy_task: JoinHandle<()>,
}

/// Bind listeners and spawn every subsystem.
pub async fn start(config: &RouterConfig) -> Result<RunningRouter, StartupError> {
    let listener = Listener::bind(&config.listener).await?;
    let proxy_addr = listener.local_addr().map_err(StartupError::LocalAddr)?;

    let status_listener = TcpListener::bind(&config.status.bind_address)
        .await
        .map_err(|source| StartupError::StatusBind {
            address: config.status.bind_address.clone(),
            source,
        })?;
    let status_addr = status_listener.local_addr().map_err(StartupError::LocalAddr)?;

    let table = Arc::new(RouteTable::new());
    let drain = Arc::new(DrainCoordinator::new(config.timeouts.drain()));
    let shutdown = Shutdown::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);
    let mut tasks = JoinSet::new();

    tasks.spawn(RegistryUpdater::new(table.clone()).run(updates_rx, shutdown.subscribe()));

    let transport_up = if config.nats.is_empty() {
        tracing::info!("No message bus configured, stale pruning always active");
        watch::channel(true).1
    } else {
        let start = RouterStart {
            id: Uuid::new_v4().to_string(),
            hosts: Vec::new(),
            minimum_register_interval_secs: config.registry.prune_interval_secs,
            prune_threshold_secs: config.registry.stale_threshold_secs,
        };
        let (subscriber, connected) = NatsSubscriber::new(config.nats.clone(), start, updates_tx.clone());
        tasks.spawn(subscriber.run(shutdown.subscribe()));
        connected
    };

    let pruner = StalePruner::new(
        table.clone(),
        config.registry.prune_interval(),
        config.registry.stale_threshold(),
        config.registry.start_delay(),
        transport_up,
    );
    tasks.spawn(pruner.run(shutdown.subscribe()));

    if config.routing_api.enabled() {
        let poller = RoutePoller::new(&config.routing_api, updates_tx.clone());
        tasks.spawn(poller.run(shutdown.subscribe()));
    }

    let status = status_router(
        StatusState {
            table: table.clone(),
            drain: drain.clone(),
        },
        BasicCredentials::new(config.status.user.clone(), config.status.pass.clone()),
    );
    let status_shutdown = shutdown.subscribe();
    tasks.spawn(async move {
        if let Err(e) = serve_status(status_listener, status, status_shutdown).await {
            tracing::error!(error = %e, "Status server failed");
        }
    });

    let server = ProxyServer::new(
        listener,
        AppState::new(table.clone(), drain.clone(), &config.timeouts),
    );
    let proxy_task = tokio::spawn(server.run(shutdown.subscribe()));

    tracing::info!(
        proxy = %proxy_addr,
        status = %status_addr,
        nats_servers = config.nats.len(),
        routing_api_hosts = config.routing_api.hosts.len(),
        "router started"
    );

    Ok(RunningRouter {
        proxy_addr,
        status_addr,
        table,
        drain,
        flush_grace: config.timeouts.drain(),
        events_tx,
        events_rx,
        updates: updates_tx,
        shutdown,
        tasks,
        proxy_task,
    })
}

impl RunningRouter {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    pub fn status_addr(&self) -> SocketAddr {
        self.status_addr
    }

    pub fn table(&self) -> Arc<RouteTable> {
        self.table.clone()
    }

    pub fn drain(&self) -> Arc<DrainCoordinator> {
        self.drain.clone()
    }

    /// Queue that drives the drain state machine.
    pub fn lifecycle_events(&self) -> mpsc::UnboundedSender<LifecycleEvent> {
        self.events_tx.clone()
    }

    /// Queue feeding the registry updater.
    pub fn registry_updates(&self) -> mpsc::Sender<RegistryUpdate> {
        self.updates.clone()
    }

    /// Serve until the drain state machine stops, then tear everything down.
    pub async fn wait(mut self) -> DrainOutcome {
        let outcome = self.drain.run(&mut self.events_rx).await;

        // after a clean drain, connections close once their last response is written
        let mut proxy_done = false;
        if outcome == DrainOutcome::Drained {
            proxy_done = timeout(self.flush_grace, &mut self.proxy_task).await.is_ok();
        }

        if let Some(tasks) = self.shutdown.trigger() {
            tracing::debug!(tasks, "Shutdown signalled to background tasks");
        }

        if !proxy_done && timeout(TASK_EXIT_GRACE, &mut self.proxy_task).await.is_err() {
            self.proxy_task.abort();
        }
        let tasks = &mut self.tasks;
        if timeout(TASK_EXIT_GRACE, async { while tasks.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not stop in time, aborting");
        }
        self.tasks.shutdown().await;

        tracing::info!(outcome = ?outcome, "Router stopped");
        outcome
    }
}
