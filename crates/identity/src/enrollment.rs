//! Agent enrollment and node key authentication.
//!
//! # Protocol Flow
//!
//! 1. Agent presents the fleet-wide enroll secret and its host identifier
//! 2. Secret is checked before any host lookup
//! 3. Host is found by identifier or created
//! 4. A fresh node key replaces whatever key the host held before
//! 5. Every later check-in presents that node key
//!
//! A host holds exactly one valid node key at a time; re-enrolling revokes
//! the previous key.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use osfleet_core::config::OsqueryConfig;
use osfleet_core::{Datastore, FleetError, FleetResult, Host};

use crate::node_key::{generate_node_key, secrets_match, DEFAULT_NODE_KEY_SIZE};

/// Issues and validates node keys.
#[derive(Clone)]
pub struct HostAuth {
    datastore: Arc<dyn Datastore>,
    enroll_secret: String,
    node_key_size: usize,
}

impl HostAuth {
    pub fn new(datastore: Arc<dyn Datastore>, enroll_secret: impl Into<String>) -> Self {
        Self {
            datastore,
            enroll_secret: enroll_secret.into(),
            node_key_size: DEFAULT_NODE_KEY_SIZE,
        }
    }

    pub fn from_config(datastore: Arc<dyn Datastore>, config: &OsqueryConfig) -> Self {
        Self::new(datastore, config.enroll_secret.clone()).with_node_key_size(config.node_key_size)
    }

    pub fn with_node_key_size(mut self, size: usize) -> Self {
        self.node_key_size = size;
        self
    }

    /// Enroll an agent and return its new node key.
    pub fn enroll_agent(&self, enroll_secret: &str, host_identifier: &str) -> FleetResult<String> {
        self.enroll_agent_at(enroll_secret, host_identifier, Utc::now())
    }

    pub fn enroll_agent_at(
        &self,
        enroll_secret: &str,
        host_identifier: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<String> {
        if !secrets_match(&self.enroll_secret, enroll_secret) {
            warn!(host_identifier, "Enrollment rejected: bad enroll secret");
            return Err(FleetError::Configuration("invalid enroll secret".to_string()));
        }

        if host_identifier.trim().is_empty() {
            warn!("Enrollment rejected: empty host identifier");
            return Err(FleetError::InvalidInput(
                "host identifier must not be empty".to_string(),
            ));
        }

        let node_key = generate_node_key(self.node_key_size);
        let host = self.datastore.enroll_host(host_identifier, &node_key, now)?;

        info!(host_id = host.id, host_identifier, "Agent enrolled");
        Ok(node_key)
    }

    /// Resolve a node key to its host and record the check-in.
    pub fn authenticate_host(&self, node_key: &str) -> FleetResult<Host> {
        self.authenticate_host_at(node_key, Utc::now())
    }

    pub fn authenticate_host_at(&self, node_key: &str, now: DateTime<Utc>) -> FleetResult<Host> {
        if node_key.is_empty() {
            return Err(FleetError::Authentication("missing node key".to_string()));
        }

        let Some(mut host) = self.datastore.host_by_node_key(node_key)? else {
            warn!("Authentication failed: unknown node key");
            return Err(FleetError::Authentication("invalid node key".to_string()));
        };

        self.datastore.mark_host_seen(host.id, now)?;
        host.seen_time = now;

        debug!(host_id = host.id, "Host authenticated");
        Ok(host)
    }
}
