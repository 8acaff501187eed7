//! External routing source.
//!
//! # Data Flow
//! ```text
//! every poll_interval:
//!     poller.rs walks candidate hosts → GET /v1/routes
//!     → types.rs (decode, skip bad entries)
//!     → diff against last applied set
//!     → RegistryUpdate::Polled batch → registry updater
//! ```

pub mod poller;
pub mod types;

pub use poller::{PollError, PollReport, RoutePoller};
pub use types::{PolledRoute, RouteEntry};
