//! rustydb-fleet: a multi-tenant orchestration plane for a fleet of
//! embedded tenant databases. A replicated metadata store assigns
//! tenants to nodes, tenant nodes lazily load/evict/archive tenant
//! databases under a weighted LRU, and a gateway fronts the fleet with
//! per-node circuit breaking.

pub mod api;
pub mod auth;
pub mod blob;
pub mod common;
pub mod config;
pub mod error;
pub mod gateway;
pub mod host;
pub mod metadata;
pub mod node;
pub mod placement;
pub mod wire;

pub use config::FleetConfig;
pub use error::{RdbError, Result};
