//! Session-scoped locking around mutations
//!
//! TigerStyle: Explicit acquire/release lifecycle, release on every exit path.
//!
//! Each mutating call creates a fresh store session, takes the lock named
//! after the target key, runs, and gives both back. Locks are per key, so
//! writers to different keys never wait on each other.

use kombu_core::{Error, Result};
use kombu_storage::{KvStore, SessionId};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs mutations while holding the target key's lock
#[derive(Clone)]
pub struct SessionCoordinator {
    store: Arc<dyn KvStore>,
}

impl SessionCoordinator {
    /// Create a coordinator over `store`
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Run `action` while holding the lock for `key`
    ///
    /// Fails with [`Error::LockUnavailable`] before running `action` if no
    /// session can be created or another session holds the lock. The lock and
    /// session are released afterwards whatever `action` returned.
    pub async fn with_session<F, Fut, T>(&self, key: &str, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self
            .store
            .create_session()
            .await
            .map_err(|e| Error::lock_unavailable(key, format!("session create failed: {}", e)))?;
        let mut guard = SessionGuard::new(self.store.clone(), session);

        match self.store.acquire_lock(guard.session(), key).await {
            Ok(true) => guard.hold(key),
            Ok(false) => {
                guard.release().await;
                return Err(Error::lock_unavailable(key, "held by another session"));
            }
            Err(e) => {
                guard.release().await;
                return Err(Error::lock_unavailable(key, e.to_string()));
            }
        }

        debug!(key, session = %guard.session(), "Lock acquired");
        let result = action().await;
        guard.release().await;
        result
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator").finish_non_exhaustive()
    }
}

/// Owns a live session and (optionally) one lock held by it
///
/// `release` gives both back. If the guard is dropped unreleased (the calling
/// future was cancelled, or a panic unwound through it) cleanup is spawned on
/// the current tokio runtime.
struct SessionGuard {
    store: Arc<dyn KvStore>,
    session: SessionId,
    lock: Option<String>,
    released: bool,
}

impl SessionGuard {
    fn new(store: Arc<dyn KvStore>, session: SessionId) -> Self {
        Self {
            store,
            session,
            lock: None,
            released: false,
        }
    }

    fn session(&self) -> &SessionId {
        debug_assert!(!self.released, "session used after release");
        &self.session
    }

    fn hold(&mut self, lock: &str) {
        debug_assert!(self.lock.is_none(), "guard holds one lock at most");
        self.lock = Some(lock.to_string());
    }

    /// Release the lock (if held) and destroy the session
    ///
    /// Failures are logged; the mutation's own outcome is what callers see.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let lock = self.lock.take();
        cleanup(self.store.as_ref(), &self.session, lock.as_deref()).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session = self.session.clone();
        let lock = self.lock.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                handle.spawn(async move {
                    cleanup(store.as_ref(), &session, lock.as_deref()).await;
                });
            }
            Err(_) => {
                warn!(session = %session, "Session dropped outside a runtime, left to expire");
            }
        }
    }
}

async fn cleanup(store: &dyn KvStore, session: &SessionId, lock: Option<&str>) {
    if let Some(name) = lock {
        if let Err(e) = store.release_lock(session, name).await {
            warn!(lock = name, session = %session, error = %e, "Lock release failed");
        }
    }
    if let Err(e) = store.destroy_session(session).await {
        warn!(session = %session, error = %e, "Session destroy failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kombu_storage::{FaultConfig, FaultType, FaultyStore, MemoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_lock_held_during_action_and_released_after() {
        let store = MemoryStore::new();
        let coordinator = SessionCoordinator::new(Arc::new(store.clone()));

        let value = coordinator
            .with_session("k", || async {
                assert!(store.lock_holder("k").await.is_some());
                assert_eq!(store.keys().await, vec![MemoryStore::lock_key("k")]);
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(store.lock_holder("k").await.is_none());
        assert_eq!(store.sessions_count().await, 0);
        // No lock key is left behind
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_released_when_action_fails() {
        let store = MemoryStore::new();
        let coordinator = SessionCoordinator::new(Arc::new(store.clone()));

        let result: Result<()> = coordinator
            .with_session("k", || async { Err(Error::internal("boom")) })
            .await;

        assert!(matches!(result, Err(Error::Internal { .. })));
        assert!(store.lock_holder("k").await.is_none());
        assert_eq!(store.sessions_count().await, 0);
    }

    #[tokio::test]
    async fn test_contended_lock_fails_without_running_action() {
        let store = MemoryStore::new();
        let coordinator = SessionCoordinator::new(Arc::new(store.clone()));

        let other = store.create_session().await.unwrap();
        assert!(store.acquire_lock(&other, "k").await.unwrap());

        let ran = AtomicBool::new(false);
        let result = coordinator
            .with_session("k", || async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::LockUnavailable { .. })));
        assert!(!ran.load(Ordering::SeqCst));
        // Our session is gone, the other holder keeps its lock
        assert_eq!(store.sessions_count().await, 1);
        assert_eq!(store.lock_holder("k").await, Some(other));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let store = MemoryStore::new();
        let coordinator = SessionCoordinator::new(Arc::new(store.clone()));

        let nested = coordinator
            .with_session("a", || async {
                coordinator.with_session("b", || async { Ok("inner") }).await
            })
            .await
            .unwrap();
        assert_eq!(nested, "inner");
    }

    #[tokio::test]
    async fn test_cancelled_action_still_releases() {
        let store = MemoryStore::new();
        let coordinator = SessionCoordinator::new(Arc::new(store.clone()));
        let (entered_tx, entered_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            coordinator
                .with_session("k", move || async move {
                    let _ = entered_tx.send(());
                    std::future::pending::<Result<()>>().await
                })
                .await
        });

        entered_rx.await.unwrap();
        assert!(store.lock_holder("k").await.is_some());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        // Cleanup runs on a spawned task
        for _ in 0..100 {
            if store.sessions_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.sessions_count().await, 0);
        assert!(store.lock_holder("k").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_create_failure_is_lock_unavailable() {
        let store = FaultyStore::new(MemoryStore::new())
            .with_fault(FaultConfig::new(FaultType::SessionCreateFail));
        let coordinator = SessionCoordinator::new(Arc::new(store));

        let result = coordinator.with_session("k", || async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::LockUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_release_failure_does_not_mask_result() {
        let memory = MemoryStore::new();
        let store = FaultyStore::new(memory.clone())
            .with_fault(FaultConfig::new(FaultType::LockReleaseFail));
        let coordinator = SessionCoordinator::new(Arc::new(store));

        let value = coordinator
            .with_session("k", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        // Destroying the session still freed the lock
        assert!(memory.lock_holder("k").await.is_none());
    }
}
