//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind listeners → spawn registry, bus, poller, status, proxy
//!
//! Signals (signals.rs):
//!     SIGUSR1 → Drain, SIGTERM/SIGINT → Stop → event queue
//!
//! Drain (drain.rs):
//!     Running → Draining → Stopped, bounded by the drain timeout
//!
//! Shutdown (shutdown.rs):
//!     Stopped → broadcast → background tasks exit, open connections close
//! ```

pub mod drain;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use drain::{DrainCoordinator, DrainOutcome, DrainState, InFlightGuard, LifecycleEvent};
pub use shutdown::Shutdown;
pub use startup::{start, RunningRouter, StartupError};
