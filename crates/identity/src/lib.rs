//! Agent identity for osfleet.
//!
//! Enroll secret validation, node key issuance and node key authentication.

pub mod enrollment;
pub mod node_key;

pub use enrollment::HostAuth;
pub use node_key::{generate_node_key, secrets_match, DEFAULT_NODE_KEY_SIZE};
