//! Core error types

use thiserror::Error;

use crate::datastore::DatastoreError;

/// Error taxonomy shared by every osfleet component.
///
/// `Authentication` and `Configuration` are the two kinds the osquery agent
/// must see as `node_invalid`; keep them distinct from every other kind.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Unknown or missing node key
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Bad enroll secret
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation on a campaign that is no longer running
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Referenced record does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Publish/subscribe failure; never surfaced to agents
    #[error("Broker error: {0}")]
    TransientBroker(String),

    /// Storage failure
    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),
}

impl FleetError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        FleetError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the agent should discard its node key and re-enroll.
    pub fn is_node_invalid(&self) -> bool {
        matches!(
            self,
            FleetError::Authentication(_) | FleetError::Configuration(_)
        )
    }
}

/// Result type for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;
