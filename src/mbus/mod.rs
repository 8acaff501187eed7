//! Message bus integration.
//!
//! # Data Flow
//! ```text
//! NATS server
//!     → nats.rs (protocol, reconnects, connectivity watch)
//!     → message.rs (decode register/unregister payloads)
//!     → RegistryUpdate::Event → registry updater
//! ```

pub mod message;
pub mod nats;

pub use message::{MessageError, RegistryMessage, RouterStart};
pub use nats::{BusError, NatsSubscriber};
