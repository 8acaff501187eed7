//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → plain values handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::RouterConfig;
pub use schema::ListenerConfig;
pub use schema::StatusConfig;
pub use schema::NatsServerConfig;
pub use schema::RegistryConfig;
pub use schema::TimeoutConfig;
pub use schema::RoutingApiConfig;
pub use schema::HostConfig;
pub use schema::CandidatePolicy;
pub use schema::ObservabilityConfig;
