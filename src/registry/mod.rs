//! Dynamic route registry.
//!
//! # Data Flow
//! ```text
//! message bus ──▶ RegistryEvent ─┐
//!                                ├─▶ updater.rs ──▶ table.rs ◀── pruner.rs (evict stale)
//! route poller ─▶ polled batch ──┘                    │
//!                                                      ▼
//!                                     proxy lookups, /routes snapshot
//! ```
//!
//! # Design Decisions
//! - The table is the only shared routing state, owned via `Arc` by every user
//! - Background tasks touch it only through its public operations
//! - Hosts are normalized to lowercase before storage and lookup

pub mod endpoint;
pub mod pruner;
pub mod table;
pub mod updater;

pub use endpoint::{Endpoint, EndpointKey, EndpointPool, RoutableHost, RouteSource};
pub use pruner::StalePruner;
pub use table::{RouteChange, RouteSnapshot, RouteTable};
pub use updater::{Action, RegistryEvent, RegistryUpdate, RegistryUpdater};
