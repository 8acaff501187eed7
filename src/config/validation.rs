//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid)
//! - Reject a missing telemetry target before anything starts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::RouterConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("observability.metrics_address is required")]
    MissingTelemetry,
}

/// Check a loaded configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_addr(&mut errors, "status.bind_address", &config.status.bind_address);

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }
    if config.status.user.is_empty() {
        errors.push(ValidationError::Empty("status.user"));
    }
    if config.status.pass.is_empty() {
        errors.push(ValidationError::Empty("status.pass"));
    }

    if config.registry.prune_interval_secs == 0 {
        errors.push(ValidationError::Zero("registry.prune_interval_secs"));
    }
    if config.registry.stale_threshold_secs == 0 {
        errors.push(ValidationError::Zero("registry.stale_threshold_secs"));
    }
    if config.timeouts.endpoint_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.endpoint_secs"));
    }

    for server in &config.nats {
        if server.host.is_empty() {
            errors.push(ValidationError::Empty("nats.host"));
        }
        if server.port == 0 {
            errors.push(ValidationError::Zero("nats.port"));
        }
    }

    if config.routing_api.enabled() {
        if config.routing_api.poll_interval_secs == 0 {
            errors.push(ValidationError::Zero("routing_api.poll_interval_secs"));
        }
        if config.routing_api.request_timeout_ms == 0 {
            errors.push(ValidationError::Zero("routing_api.request_timeout_ms"));
        }
        for host in &config.routing_api.hosts {
            if host.address.is_empty() {
                errors.push(ValidationError::Empty("routing_api.hosts.address"));
            }
            if host.port == 0 {
                errors.push(ValidationError::Zero("routing_api.hosts.port"));
            }
        }
    }

    let metrics_address = config.observability.metrics_address.trim();
    if metrics_address.is_empty() {
        errors.push(ValidationError::MissingTelemetry);
    } else {
        check_addr(&mut errors, "observability.metrics_address", metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
