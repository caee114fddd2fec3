//! End-to-end tests across the osfleet crates
//!
//! This test suite validates:
//! - Enrollment and node key authentication feeding campaign work
//! - Campaign targeting across explicit hosts and label membership
//! - Live result streams while some targets never check in
//! - Parity of the memory and SQLite datastores under the same workload

pub mod test_utils;

#[cfg(test)]
mod campaign_e2e;

#[cfg(test)]
mod datastore_parity;
