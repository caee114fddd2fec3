//! Error types for result broker operations.

use osfleet_core::FleetError;
use thiserror::Error;

/// Errors that can occur while publishing or subscribing to results.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Backend connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publishing a result failed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Opening a subscription failed
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Result could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend did not answer in time
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl From<BrokerError> for FleetError {
    fn from(err: BrokerError) -> Self {
        FleetError::TransientBroker(err.to_string())
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
