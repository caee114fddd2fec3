//! osfleet Stream
//!
//! Per-campaign result fan-out between agent check-in handlers and live
//! result streams, over an in-process, Redis or NATS backend.

#![warn(missing_docs)]

pub mod broker;
pub mod error;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats_broker;
#[cfg(feature = "redis")]
pub mod redis_broker;
pub mod registry;
pub mod topic;

use std::sync::Arc;

use osfleet_core::config::{BrokerBackend, BrokerConfig};
use tracing::info;

pub use broker::ResultBroker;
pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
#[cfg(feature = "nats")]
pub use nats_broker::NatsBroker;
#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;
pub use registry::{Subscription, SubscriptionRegistry};

/// Build the broker selected by configuration.
pub async fn connect(config: &BrokerConfig) -> BrokerResult<Arc<dyn ResultBroker>> {
    info!(backend = ?config.backend, "Initializing result broker");

    match config.backend {
        BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new(
            config.channel_capacity,
            config.write_timeout(),
        ))),
        #[cfg(feature = "redis")]
        BrokerBackend::Redis => Ok(Arc::new(
            RedisBroker::connect(
                &config.redis_url,
                config.channel_capacity,
                config.write_timeout(),
            )
            .await?,
        )),
        #[cfg(feature = "nats")]
        BrokerBackend::Nats => Ok(Arc::new(
            NatsBroker::connect(
                &config.nats_url,
                config.channel_capacity,
                config.write_timeout(),
            )
            .await?,
        )),
        #[allow(unreachable_patterns)]
        other => Err(BrokerError::Connection(format!(
            "{other:?} backend not compiled in"
        ))),
    }
}
