//! Core functionality for the osfleet distributed query service.
//!
//! This crate provides the fleet entities, the datastore interface with its
//! in-memory and SQLite implementations, configuration and logging used
//! across the osfleet workspace.

pub mod config;
pub mod datastore;
pub mod error;
pub mod logging;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

pub use config::{AppConfig, BrokerBackend, ConfigError, DatastoreBackend};
pub use datastore::{Datastore, DatastoreError, DatastoreResult, ExecutionUpdate};
pub use error::{FleetError, FleetResult};
pub use memory::MemoryDatastore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatastore;
pub use types::{
    Campaign, CampaignStatus, DistributedQueryResult, Execution, ExecutionStatus, Host,
    HostDetails, HostSummary, Label, LabelQueryExecution, NewCampaign, Query, Row, Target,
    TargetMetrics, TargetSelection, TargetType,
};
