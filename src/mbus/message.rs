//! Registration message payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::registry::endpoint::dialable;
use crate::registry::{Action, Endpoint, RegistryEvent, RoutableHost, RouteSource};

/// Errors decoding a bus payload.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has no endpoint host")]
    MissingHost,

    #[error("endpoint address '{0}' is not dialable")]
    InvalidAddress(String),

    #[error("message lists no usable uris")]
    NoUris,
}

/// Body of `router.register` / `router.unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryMessage {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub private_instance_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RegistryMessage {
    pub fn from_slice(payload: &[u8]) -> Result<Self, MessageError> {
        let message: RegistryMessage = serde_json::from_slice(payload)?;
        if message.host.trim().is_empty() {
            return Err(MessageError::MissingHost);
        }
        if !dialable(&message.host, message.port) {
            return Err(MessageError::InvalidAddress(format!("{}:{}", message.host, message.port)));
        }
        Ok(message)
    }

    /// Convert to a registry event. Blank uris are skipped.
    pub fn into_event(self, action: Action) -> Result<RegistryEvent, MessageError> {
        let hosts: Vec<RoutableHost> = self.uris.iter().filter_map(|uri| RoutableHost::new(uri)).collect();
        if hosts.is_empty() {
            return Err(MessageError::NoUris);
        }

        let mut endpoint = Endpoint::new(self.host, self.port, self.private_instance_id, RouteSource::Announced)
            .with_tags(self.tags);
        if let Some(app) = self.app {
            endpoint = endpoint.with_app_id(app);
        }

        Ok(RegistryEvent { action, hosts, endpoint })
    }
}

/// Body of `router.start`, also the reply to `router.greet`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouterStart {
    pub id: String,
    pub hosts: Vec<String>,
    #[serde(rename = "minimumRegisterIntervalInSeconds")]
    pub minimum_register_interval_secs: u64,
    #[serde(rename = "pruneThresholdInSeconds")]
    pub prune_threshold_secs: u64,
}
