//! OS signal handling.
//!
//! Signals are translated into [`LifecycleEvent`]s on the coordinator's queue:
//! - `SIGUSR1` → `Drain`
//! - `SIGTERM`, `SIGINT` → `Stop`

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lifecycle::drain::LifecycleEvent;

/// Install handlers and forward signals until the queue closes.
#[cfg(unix)]
pub fn listen(events: mpsc::UnboundedSender<LifecycleEvent>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut drain = signal(SignalKind::user_defined1())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let (name, event) = tokio::select! {
                _ = drain.recv() => ("SIGUSR1", LifecycleEvent::Drain),
                _ = terminate.recv() => ("SIGTERM", LifecycleEvent::Stop),
                _ = interrupt.recv() => ("SIGINT", LifecycleEvent::Stop),
            };
            tracing::info!(signal = name, event = ?event, "Signal received");
            if events.send(event).is_err() {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn listen(events: mpsc::UnboundedSender<LifecycleEvent>) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = "ctrl-c", "Signal received");
            if events.send(LifecycleEvent::Stop).is_err() {
                break;
            }
        }
    }))
}
