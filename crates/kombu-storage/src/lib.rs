//! Kombu Storage
//!
//! Key-value store backends for the Kombu registry.
//!
//! # Overview
//!
//! Provides the hierarchical KV store the registry persists into:
//! - In-memory (for testing and single-process use)
//! - Consul (agent HTTP API)
//! - A fault-injecting wrapper for deterministic failure tests

pub mod consul;
pub mod faulty;
pub mod kv;
pub mod memory;

pub use consul::ConsulStore;
pub use faulty::{FaultConfig, FaultType, FaultyStore};
pub use kv::{KvStore, SessionId};
pub use memory::MemoryStore;

use kombu_core::{StoreBackend, StoreConfig};
use std::sync::Arc;

/// Build the store selected by `config`
pub fn open_store(config: &StoreConfig) -> kombu_core::Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Consul => Ok(Arc::new(ConsulStore::connect(config.consul.clone())?)),
    }
}
