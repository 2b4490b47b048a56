//! In-memory KV storage
//!
//! For testing and single-process use. Sessions and locks follow Consul
//! semantics: a lock is held by one session, re-acquiring by the holder
//! succeeds, and destroying a session releases its locks.
//!
//! Like Consul, every lock is backed by a key under [`LOCK_PREFIX_DEFAULT`]
//! holding the session id. `release_lock` removes that key; a session that is
//! destroyed while still holding a lock leaves it behind.

use crate::kv::{KvStore, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use kombu_core::{Error, Result, LOCK_PREFIX_DEFAULT};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Store state guarded by a single lock
#[derive(Debug, Default)]
struct StoreState {
    /// key -> value, ordered so prefix listing is a range scan
    data: BTreeMap<String, Vec<u8>>,
    /// Live sessions
    sessions: HashSet<String>,
    /// lock name -> holding session
    locks: HashMap<String, String>,
}

/// In-memory KV store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    /// Create a new in-memory KV store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.state.read().await.data.len()
    }

    /// Whether the store holds no keys
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.data.is_empty()
    }

    /// All stored keys, in order
    pub async fn keys(&self) -> Vec<String> {
        self.state.read().await.data.keys().cloned().collect()
    }

    /// Number of live sessions
    pub async fn sessions_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Store key backing lock `name`
    pub fn lock_key(name: &str) -> String {
        format!("{}{}", LOCK_PREFIX_DEFAULT, name)
    }

    /// Session currently holding lock `name`, if any
    pub async fn lock_holder(&self, name: &str) -> Option<SessionId> {
        self.state
            .read()
            .await
            .locks
            .get(name)
            .map(|s| SessionId::new(s.clone()))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    #[instrument(skip(self), level = "trace")]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let state = self.state.read().await;
        Ok(state.data.get(key).map(|v| Bytes::copy_from_slice(v)))
    }

    #[instrument(skip(self, value), fields(value_len = value.len()), level = "trace")]
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        assert!(!key.is_empty(), "key cannot be empty");

        let mut state = self.state.write().await;
        state.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.data.remove(key);
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn create_session(&self) -> Result<SessionId> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.write().await;
        let inserted = state.sessions.insert(id.clone());
        debug_assert!(inserted, "session ids must be unique");
        debug!(session = %id, "Memory session created");
        Ok(SessionId::new(id))
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        state.sessions.remove(session.as_str());
        state.locks.retain(|_, holder| holder != session.as_str());

        // Postcondition
        debug_assert!(!state.locks.values().any(|h| h == session.as_str()));
        debug!(session = %session, "Memory session destroyed");
        Ok(())
    }

    async fn acquire_lock(&self, session: &SessionId, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;

        if !state.sessions.contains(session.as_str()) {
            return Err(Error::session_failed(format!(
                "session {} does not exist",
                session
            )));
        }

        match state.locks.get(name) {
            Some(holder) if holder != session.as_str() => Ok(false),
            Some(_) => Ok(true),
            None => {
                state
                    .locks
                    .insert(name.to_string(), session.as_str().to_string());
                state
                    .data
                    .insert(Self::lock_key(name), session.as_str().as_bytes().to_vec());
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, session: &SessionId, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.locks.get(name).map(String::as_str) == Some(session.as_str()) {
            state.locks.remove(name);
        }
        // Drop the backing key unless another session holds the lock
        if !state.locks.contains_key(name) {
            state.data.remove(&Self::lock_key(name));
        }
        Ok(())
    }
}
