//! KV store trait and session handles
//!
//! TigerStyle: Explicit operations, string keys, opaque byte values.
//!
//! Every primitive is individually atomic; nothing here spans keys. Mutual
//! exclusion across processes comes from sessions and the locks they hold.

use async_trait::async_trait;
use bytes::Bytes;
use kombu_core::Result;
use std::fmt;
use std::sync::Arc;

/// Opaque session handle issued by a store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a store-issued session identifier
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(!id.is_empty(), "session id cannot be empty");
        Self(id)
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hierarchical key-value store with sessions and session-held locks
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set a key-value pair
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a key (deleting an absent key is not an error)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// List all keys starting with `prefix`
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create a new session
    async fn create_session(&self) -> Result<SessionId>;

    /// Destroy a session, releasing every lock it still holds
    async fn destroy_session(&self, session: &SessionId) -> Result<()>;

    /// Try to take the lock `name` for `session`
    ///
    /// Returns `Ok(false)` when another session holds it. Never blocks.
    async fn acquire_lock(&self, session: &SessionId, name: &str) -> Result<bool>;

    /// Release the lock `name` if `session` holds it
    ///
    /// Once no session holds the lock, the key backing it is removed too.
    async fn release_lock(&self, session: &SessionId, name: &str) -> Result<()>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_keys(prefix).await
    }

    async fn create_session(&self) -> Result<SessionId> {
        (**self).create_session().await
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<()> {
        (**self).destroy_session(session).await
    }

    async fn acquire_lock(&self, session: &SessionId, name: &str) -> Result<bool> {
        (**self).acquire_lock(session, name).await
    }

    async fn release_lock(&self, session: &SessionId, name: &str) -> Result<()> {
        (**self).release_lock(session, name).await
    }
}
