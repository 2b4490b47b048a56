//! Kombu Registry
//!
//! Typed object registry over a distributed key-value store.
//!
//! # Overview
//!
//! Objects are stored under caller-chosen keys and can be read back by key,
//! by key with an expected type, or enumerated by type:
//! - Each object is written as a primary entry plus a bookmark under its type
//!   tag, so enumeration lists one prefix instead of scanning the store
//! - Mutations hold a per-key lock taken through a store session
//! - Subtype queries follow an explicit [`TypeHierarchy`]
//!
//! # Example
//!
//! ```rust
//! use kombu_registry::Registry;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> kombu_core::Result<()> {
//! let registry = Registry::builder().build()?;
//! registry.put("greeting", &"hello".to_string()).await?;
//!
//! let greeting = registry.lookup_typed::<String>("greeting").await?;
//! assert_eq!(greeting.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod index;
pub mod registry;
pub mod session;

pub use codec::{ObjectCodec, StoredObject};
pub use index::{
    bookmark_key_for, escape_type_tag, extract_original_key, key_prefix_for, IndexMaintainer,
};
pub use registry::{ObjectSource, Registry, RegistryBuilder};
pub use session::SessionCoordinator;

pub use kombu_core::{Error, Result, Tagged, TypeHierarchy, TypeTag};
