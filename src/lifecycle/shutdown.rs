//! Teardown broadcast for background tasks.
//!
//! Fired by `RunningRouter::wait` once the drain state machine has produced
//! an outcome. Every long-running task (updater, bus subscriber, pruner,
//! poller, status and proxy servers) holds a receiver and exits on it.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

pub struct Shutdown {
    tx: broadcast::Sender<()>,
    fired: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            fired: AtomicBool::new(false),
        }
    }

    /// A receiver for one task. Subscribing after [`trigger`](Self::trigger)
    /// misses the signal, so tasks are spawned before teardown starts.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every task. Only the first call sends; returns how many tasks
    /// were listening at that point, or `None` on repeat calls.
    pub fn trigger(&self) -> Option<usize> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return None;
        }
        let listening = self.tx.receiver_count();
        let _ = self.tx.send(());
        Some(listening)
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_task_once() {
        let shutdown = Shutdown::new();
        let mut updater = shutdown.subscribe();
        let mut pruner = shutdown.subscribe();
        assert!(!shutdown.is_triggered());

        assert_eq!(shutdown.trigger(), Some(2));
        assert!(updater.recv().await.is_ok());
        assert!(pruner.recv().await.is_ok());

        assert_eq!(shutdown.trigger(), None);
        assert!(shutdown.is_triggered());
        assert!(pruner.try_recv().is_err());
    }

    #[tokio::test]
    async fn trigger_without_listeners_is_harmless() {
        let shutdown = Shutdown::default();
        assert_eq!(shutdown.trigger(), Some(0));
    }
}
