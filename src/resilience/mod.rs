//! Resilience helpers.
//!
//! # Design Decisions
//! - Transport failures are retried on a schedule, never fatal
//! - Reconnect delays grow exponentially, capped, with jitter so a fleet of
//!   routers does not reconnect in lockstep

pub mod backoff;
