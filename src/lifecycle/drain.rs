//! Graceful drain coordination.
//!
//! # States
//! ```text
//! Running ──Drain──▶ Draining ──(in-flight = 0 | deadline)──▶ Stopped
//!    │                  │
//!    └──────Stop────────┴──────────────────────────────────▶ Stopped
//! ```
//!
//! # Responsibilities
//! - Track requests in flight with scoped guards
//! - Tell the accept loop when to stop admitting connections
//! - Bound the drain by a deadline
//!
//! Events arrive on a queue, so the state machine can be driven without
//! delivering real process signals.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::observability::metrics;

/// Input to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Stop admitting, wait (bounded) for in-flight requests, then stop.
    Drain,
    /// Stop at once.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Running,
    Draining { deadline: Instant },
    Stopped,
}

/// How the coordinator reached `Stopped`. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight request completed.
    Drained,
    /// The deadline passed with requests still outstanding.
    DeadlineElapsed { abandoned: usize },
    /// An immediate stop was requested.
    Stopped { abandoned: usize },
}

/// Process-wide drain state.
#[derive(Debug)]
pub struct DrainCoordinator {
    drain_timeout: Duration,
    state: Mutex<DrainState>,
    accepting: watch::Sender<bool>,
    in_flight: watch::Sender<usize>,
}

impl DrainCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            drain_timeout,
            state: Mutex::new(DrainState::Running),
            accepting: watch::channel(true).0,
            in_flight: watch::channel(0).0,
        }
    }

    pub fn state(&self) -> DrainState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether new connections may be admitted.
    pub fn is_accepting(&self) -> bool {
        *self.accepting.borrow()
    }

    /// Receiver that flips to `false` once admission stops.
    pub fn accepting(&self) -> watch::Receiver<bool> {
        self.accepting.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Count a request until the returned guard is dropped.
    pub fn track_request(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.send_modify(|count| *count += 1);
        metrics::set_in_flight(self.in_flight());
        InFlightGuard {
            coordinator: Arc::clone(self),
        }
    }

    fn release(&self) {
        self.in_flight.send_modify(|count| *count = count.saturating_sub(1));
        metrics::set_in_flight(self.in_flight());
    }

    /// Enter `Draining` and close admission. Idempotent; returns the deadline.
    pub fn begin_drain(&self) -> Instant {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *state {
            DrainState::Running => {
                let deadline = Instant::now() + self.drain_timeout;
                *state = DrainState::Draining { deadline };
                self.accepting.send_replace(false);
                deadline
            }
            DrainState::Draining { deadline } => deadline,
            DrainState::Stopped => Instant::now(),
        }
    }

    fn finish(&self, outcome: DrainOutcome) -> DrainOutcome {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = DrainState::Stopped;
        self.accepting.send_replace(false);
        outcome
    }

    /// Drive the state machine from `events` until `Stopped`.
    ///
    /// A closed queue while running counts as `Stop`.
    pub async fn run(&self, events: &mut mpsc::UnboundedReceiver<LifecycleEvent>) -> DrainOutcome {
        loop {
            match events.recv().await {
                Some(LifecycleEvent::Drain) => break,
                Some(LifecycleEvent::Stop) | None => {
                    tracing::info!(in_flight = self.in_flight(), "Immediate stop requested");
                    return self.finish(DrainOutcome::Stopped { abandoned: self.in_flight() });
                }
            }
        }

        let deadline = self.begin_drain();
        tracing::info!(
            in_flight = self.in_flight(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "Draining: no longer accepting connections"
        );

        let mut idle = self.in_flight.subscribe();
        let mut events_open = true;
        let outcome = loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(LifecycleEvent::Stop) => {
                        tracing::info!(in_flight = self.in_flight(), "Immediate stop requested while draining");
                        break DrainOutcome::Stopped { abandoned: self.in_flight() };
                    }
                    Some(LifecycleEvent::Drain) => {
                        tracing::debug!("Already draining");
                    }
                    None => events_open = false,
                },
                _ = wait_until_idle(&mut idle) => {
                    tracing::info!("All in-flight requests completed");
                    break DrainOutcome::Drained;
                }
                _ = sleep_until(deadline) => {
                    let abandoned = self.in_flight();
                    tracing::info!(abandoned, "Drain deadline elapsed");
                    break DrainOutcome::DeadlineElapsed { abandoned };
                }
            }
        };

        self.finish(outcome)
    }
}

async fn wait_until_idle(in_flight: &mut watch::Receiver<usize>) {
    let _ = in_flight.wait_for(|count| *count == 0).await;
}

/// Keeps a request counted as in flight; releases on drop, on every path.
#[derive(Debug)]
pub struct InFlightGuard {
    coordinator: Arc<DrainCoordinator>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}
