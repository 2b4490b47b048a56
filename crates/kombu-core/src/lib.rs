//! Kombu Core
//!
//! Core types, errors, configuration and constants for the Kombu object registry.
//!
//! # Overview
//!
//! Kombu stores application objects under string keys in a distributed
//! key-value store and indexes them by type tag, so they can be looked up by
//! key or enumerated by type without scanning the whole namespace.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `KEY_LENGTH_BYTES_MAX`)
//! - Assertions on preconditions and postconditions
//! - No recursion (bounded iteration only)

pub mod config;
pub mod constants;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{ConsulConfig, KombuConfig, RegistryConfig, StoreBackend, StoreConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use types::{Tagged, TypeHierarchy, TypeTag};
