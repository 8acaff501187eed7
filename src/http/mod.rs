//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, hyper connection, axum router)
//!     → request.rs (request ID, routable host, rewrite for the endpoint)
//!     → route table lookup + uniform endpoint choice
//!     → response.rs (stream back, release in-flight slot, router errors)
//!     → Send to client
//!
//! Status listener:
//!     → status.rs (/routes behind auth.rs, /healthz)
//! ```

pub mod auth;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use auth::BasicCredentials;
pub use request::X_REQUEST_ID;
pub use response::X_CF_ROUTER_ERROR;
pub use server::{AppState, ProxyServer};
pub use status::{serve_status, status_router, StatusState};
