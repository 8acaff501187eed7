//! Dynamic HTTP Router Library

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mbus;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing_api;

pub use config::schema::RouterConfig;
pub use lifecycle::{start, DrainOutcome, LifecycleEvent, RunningRouter};
pub use registry::RouteTable;
