//! Fault injection for deterministic testing
//!
//! TigerStyle: Explicit fault types, deterministic triggering.
//!
//! [`FaultyStore`] wraps any [`KvStore`] and fails selected operations
//! according to registered [`FaultConfig`]s. Triggering depends only on the
//! sequence of operations, so a failing test replays identically.

use crate::kv::{KvStore, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use kombu_core::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Types of faults that can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// `get` / `list_keys` fail
    StoreReadFail,
    /// `put` / `delete` fail
    StoreWriteFail,
    /// `create_session` fails
    SessionCreateFail,
    /// `destroy_session` fails
    SessionDestroyFail,
    /// `acquire_lock` reports the lock as held by someone else
    LockContended,
    /// `release_lock` fails
    LockReleaseFail,
}

impl FaultType {
    /// Get a human-readable name for this fault type
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::StoreReadFail => "store_read_fail",
            FaultType::StoreWriteFail => "store_write_fail",
            FaultType::SessionCreateFail => "session_create_fail",
            FaultType::SessionDestroyFail => "session_destroy_fail",
            FaultType::LockContended => "lock_contended",
            FaultType::LockReleaseFail => "lock_release_fail",
        }
    }

    /// Whether this fault applies to the named store operation
    fn applies_to(&self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (FaultType::StoreReadFail, Operation::Get | Operation::ListKeys)
                | (FaultType::StoreWriteFail, Operation::Put | Operation::Delete)
                | (FaultType::SessionCreateFail, Operation::CreateSession)
                | (FaultType::SessionDestroyFail, Operation::DestroySession)
                | (FaultType::LockContended, Operation::AcquireLock)
                | (FaultType::LockReleaseFail, Operation::ReleaseLock)
        )
    }
}

/// Store operation being checked for faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Get,
    Put,
    Delete,
    ListKeys,
    CreateSession,
    DestroySession,
    AcquireLock,
    ReleaseLock,
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault to inject
    pub fault_type: FaultType,
    /// Only trigger for keys (or lock names) containing this substring
    pub key_filter: Option<String>,
    /// Skip this many matching operations before triggering
    pub after_operations: u64,
    /// Maximum number of times to trigger
    pub max_triggers: Option<u64>,
}

impl FaultConfig {
    /// Create a new fault configuration that triggers on every matching operation
    pub fn new(fault_type: FaultType) -> Self {
        Self {
            fault_type,
            key_filter: None,
            after_operations: 0,
            max_triggers: None,
        }
    }

    /// Set a key filter
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.key_filter = Some(filter.into());
        self
    }

    /// Set the number of matching operations to let through first
    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    /// Set the maximum number of triggers
    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }
}

/// State for a registered fault
#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    seen_count: AtomicU64,
    trigger_count: AtomicU64,
}

/// KV store wrapper that injects faults
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    faults: Vec<FaultState>,
    injected_count: AtomicU64,
}

impl<S: KvStore> FaultyStore<S> {
    /// Wrap `inner` with no faults registered
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Vec::new(),
            injected_count: AtomicU64::new(0),
        }
    }

    /// Register a fault
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(FaultState {
            config,
            seen_count: AtomicU64::new(0),
            trigger_count: AtomicU64::new(0),
        });
        self
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of faults injected so far
    pub fn injected_count(&self) -> u64 {
        self.injected_count.load(Ordering::SeqCst)
    }

    /// Check whether a fault fires for `operation` on `key`
    fn should_inject(&self, operation: Operation, key: &str) -> Option<FaultType> {
        for fault in &self.faults {
            let config = &fault.config;

            if !config.fault_type.applies_to(operation) {
                continue;
            }
            if let Some(filter) = &config.key_filter {
                if !key.contains(filter.as_str()) {
                    continue;
                }
            }

            let seen = fault.seen_count.fetch_add(1, Ordering::SeqCst);
            if seen < config.after_operations {
                continue;
            }
            if let Some(max) = config.max_triggers {
                if fault.trigger_count.load(Ordering::SeqCst) >= max {
                    continue;
                }
            }

            fault.trigger_count.fetch_add(1, Ordering::SeqCst);
            self.injected_count.fetch_add(1, Ordering::SeqCst);
            debug!(fault = config.fault_type.name(), key, "Injecting fault");
            return Some(config.fault_type);
        }
        None
    }

    fn check(&self, operation: Operation, key: &str) -> Result<()> {
        match self.should_inject(operation, key) {
            None | Some(FaultType::LockContended) => Ok(()),
            Some(FaultType::StoreReadFail) => {
                Err(Error::storage_read_failed(key, "injected read fault"))
            }
            Some(FaultType::StoreWriteFail) => {
                Err(Error::storage_write_failed(key, "injected write fault"))
            }
            Some(fault) => Err(Error::session_failed(format!("injected {}", fault.name()))),
        }
    }
}

#[async_trait]
impl<S: KvStore> KvStore for FaultyStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check(Operation::Get, key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check(Operation::Put, key)?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(Operation::Delete, key)?;
        self.inner.delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check(Operation::ListKeys, prefix)?;
        self.inner.list_keys(prefix).await
    }

    async fn create_session(&self) -> Result<SessionId> {
        self.check(Operation::CreateSession, "")?;
        self.inner.create_session().await
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<()> {
        self.check(Operation::DestroySession, session.as_str())?;
        self.inner.destroy_session(session).await
    }

    async fn acquire_lock(&self, session: &SessionId, name: &str) -> Result<bool> {
        if self.should_inject(Operation::AcquireLock, name) == Some(FaultType::LockContended) {
            return Ok(false);
        }
        self.inner.acquire_lock(session, name).await
    }

    async fn release_lock(&self, session: &SessionId, name: &str) -> Result<()> {
        self.check(Operation::ReleaseLock, name)?;
        self.inner.release_lock(session, name).await
    }
}
