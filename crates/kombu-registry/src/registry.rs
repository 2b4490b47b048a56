//! Registry facade
//!
//! TigerStyle: Every mutation runs under the target key's lock, reads take
//! no lock and tolerate torn index state.
//!
//! # Operations
//!
//! - `put`: replace whatever is stored under a key (entry and bookmark)
//! - `lookup` / `lookup_typed`: exact-key reads
//! - `find_by_type` / `find_by_type_with_name` / `find_by_tag`: enumerate
//!   everything assignable to a type, subtypes included
//! - `remove`: delete an entry and its bookmark

use crate::codec::{ObjectCodec, StoredObject};
use crate::index::{validate_key, IndexMaintainer};
use crate::session::SessionCoordinator;
use async_trait::async_trait;
use kombu_core::{
    ConsulConfig, Error, KombuConfig, RegistryConfig, Result, Tagged, TypeHierarchy, TypeTag,
};
use kombu_storage::{open_store, ConsulStore, KvStore, MemoryStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Read access to stored objects by key and by type tag
///
/// Object-safe, so hosts that resolve dependencies by name can hold an
/// `Arc<dyn ObjectSource>` without knowing the concrete registry.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// The object stored under `key`, if any
    async fn lookup(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Every object assignable to `tag`, keyed by registry key
    async fn find_by_tag(&self, tag: &TypeTag) -> Result<BTreeMap<String, StoredObject>>;
}

/// Typed object registry over a [`KvStore`]
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KvStore>,
    index: IndexMaintainer,
    sessions: SessionCoordinator,
    codec: ObjectCodec,
    hierarchy: Arc<TypeHierarchy>,
}

impl Registry {
    /// Registry over `store` with default configuration and no subtype relations
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::assemble(store, &RegistryConfig::default(), TypeHierarchy::new())
    }

    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry over the store selected by `config`
    pub fn from_config(config: &KombuConfig) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.store)?;
        Self::builder()
            .with_shared_store(store)
            .with_config(config.registry.clone())
            .build()
    }

    fn assemble(store: Arc<dyn KvStore>, config: &RegistryConfig, hierarchy: TypeHierarchy) -> Self {
        Self {
            index: IndexMaintainer::new(store.clone()),
            sessions: SessionCoordinator::new(store.clone()),
            codec: ObjectCodec::new(config),
            hierarchy: Arc::new(hierarchy),
            store,
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Subtype relations used by typed reads and enumeration
    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Store an owned copy of `object` under `key`
    ///
    /// Whatever was stored under `key` before is removed first, including its
    /// bookmark under the old type. Encoding happens before any store call,
    /// so a value that cannot be encoded leaves the store untouched.
    #[instrument(skip(self, object), fields(type_tag = T::TYPE_TAG))]
    pub async fn put<T: Tagged>(&self, key: &str, object: &T) -> Result<()> {
        validate_key(key)?;

        let tag = TypeTag::new(T::TYPE_TAG)?;
        let payload = self.codec.encode(&self.codec.clone_object(object))?;

        self.sessions
            .with_session(key, || async {
                if let Some(previous) = self.lookup(key).await? {
                    debug!(key, previous = %previous.type_tag(), "Replacing existing entry");
                    self.index.delete_pair(key, previous.type_tag()).await?;
                }
                self.index.write_pair(key, &tag, &payload).await
            })
            .await?;

        info!(key, type_tag = %tag, size = payload.len(), "Object stored");
        Ok(())
    }

    /// Remove the object stored under `key`
    ///
    /// Fails with [`Error::NotFound`] if nothing is stored there, checked
    /// both before and after the key's lock is taken.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        if !self.store.exists(key).await? {
            return Err(Error::not_found(key));
        }

        self.sessions
            .with_session(key, || async {
                let stored = self
                    .lookup(key)
                    .await?
                    .ok_or_else(|| Error::not_found(key))?;
                self.index.delete_pair(key, stored.type_tag()).await
            })
            .await?;

        info!(key, "Object removed");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The object stored under `key`, or `None`
    ///
    /// A key that `put` would reject can never have been stored, so it reads
    /// as absent without touching the store.
    pub async fn lookup(&self, key: &str) -> Result<Option<StoredObject>> {
        if validate_key(key).is_err() {
            return Ok(None);
        }

        match self.store.get(key).await? {
            Some(payload) => self.codec.decode(key, &payload).map(Some),
            None => Ok(None),
        }
    }

    /// The object stored under `key` as a `T`, or `None`
    ///
    /// Fails with [`Error::TypeMismatch`] when the stored type is not `T` or
    /// a registered subtype of it.
    pub async fn lookup_typed<T: Tagged>(&self, key: &str) -> Result<Option<T>> {
        let Some(stored) = self.lookup(key).await? else {
            return Ok(None);
        };

        let requested = TypeTag::of::<T>();
        if !self.hierarchy.is_assignable(stored.type_tag(), &requested) {
            return Err(Error::type_mismatch(
                key,
                requested.as_str(),
                stored.type_tag().as_str(),
            ));
        }

        stored.into_typed().map(Some)
    }

    /// Every object assignable to `tag`, keyed by registry key
    ///
    /// Walks the bookmarks of `tag` and of each registered subtype. Bookmarks
    /// whose entry is gone or now holds an unrelated type are skipped.
    #[instrument(skip(self, tag), fields(tag = %tag))]
    pub async fn find_by_tag(&self, tag: &TypeTag) -> Result<BTreeMap<String, StoredObject>> {
        let mut tags = vec![tag.clone()];
        tags.extend(self.hierarchy.descendants(tag));

        let mut found = BTreeMap::new();
        for candidate in &tags {
            for key in self.index.bookmarked_keys(candidate).await? {
                if found.contains_key(&key) || validate_key(&key).is_err() {
                    continue;
                }

                match self.lookup(&key).await? {
                    Some(stored) if self.hierarchy.is_assignable(stored.type_tag(), tag) => {
                        found.insert(key, stored);
                    }
                    Some(stored) => {
                        debug!(key = %key, actual = %stored.type_tag(), "Skipping stale bookmark");
                    }
                    None => {
                        debug!(key = %key, "Skipping dangling bookmark");
                    }
                }
            }
        }

        debug!(tags = tags.len(), found = found.len(), "Enumeration complete");
        Ok(found)
    }

    /// Every object assignable to `T`, ordered by key
    pub async fn find_by_type<T: Tagged>(&self) -> Result<Vec<T>> {
        self.find_by_tag(&TypeTag::of::<T>())
            .await?
            .into_values()
            .map(StoredObject::into_typed)
            .collect()
    }

    /// Every object assignable to `T`, keyed by registry key
    pub async fn find_by_type_with_name<T: Tagged>(&self) -> Result<HashMap<String, T>> {
        self.find_by_tag(&TypeTag::of::<T>())
            .await?
            .into_iter()
            .map(|(key, stored)| Ok((key, stored.into_typed()?)))
            .collect()
    }

    // =========================================================================
    // Name-based aliases
    // =========================================================================

    /// Same as [`Registry::lookup`]
    pub async fn lookup_by_name(&self, name: &str) -> Result<Option<StoredObject>> {
        self.lookup(name).await
    }

    /// Same as [`Registry::lookup_typed`]
    pub async fn lookup_by_name_and_type<T: Tagged>(&self, name: &str) -> Result<Option<T>> {
        self.lookup_typed(name).await
    }

    /// Same as [`Registry::find_by_type_with_name`]
    pub async fn lookup_by_type<T: Tagged>(&self) -> Result<HashMap<String, T>> {
        self.find_by_type_with_name().await
    }
}

#[async_trait]
impl ObjectSource for Registry {
    async fn lookup(&self, key: &str) -> Result<Option<StoredObject>> {
        Registry::lookup(self, key).await
    }

    async fn find_by_tag(&self, tag: &TypeTag) -> Result<BTreeMap<String, StoredObject>> {
        Registry::find_by_tag(self, tag).await
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("codec", &self.codec)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RegistryBuilder
// =============================================================================

/// Builder for [`Registry`]
///
/// Without a store the registry runs over a fresh [`MemoryStore`].
#[derive(Default)]
pub struct RegistryBuilder {
    store: Option<Arc<dyn KvStore>>,
    config: RegistryConfig,
    hierarchy: TypeHierarchy,
}

impl RegistryBuilder {
    /// Use `store` as the backing store
    pub fn with_store<S: KvStore + 'static>(self, store: S) -> Self {
        self.with_shared_store(Arc::new(store))
    }

    /// Use an already shared store
    pub fn with_shared_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connect to a Consul agent
    pub fn with_consul(self, config: ConsulConfig) -> Result<Self> {
        let store = ConsulStore::connect(config)?;
        Ok(self.with_store(store))
    }

    /// Set registry behavior configuration
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `Sub <: Super`
    pub fn with_subtype<Sub: Tagged, Super: Tagged>(mut self) -> Result<Self> {
        self.hierarchy.register::<Sub, Super>()?;
        Ok(self)
    }

    /// Replace the type hierarchy
    pub fn with_hierarchy(mut self, hierarchy: TypeHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Build the registry
    pub fn build(self) -> Result<Registry> {
        let config = KombuConfig {
            registry: self.config,
            ..KombuConfig::default()
        };
        config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        Ok(Registry::assemble(store, &config.registry, self.hierarchy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kombu_storage::{FaultConfig, FaultType, FaultyStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    impl Tagged for Widget {
        const TYPE_TAG: &'static str = "test.Widget";
    }

    fn registry_over(store: &MemoryStore) -> Registry {
        Registry::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_put_writes_entry_and_bookmark() {
        let store = MemoryStore::new();
        let registry = registry_over(&store);

        registry.put("s1", &"hello".to_string()).await.unwrap();

        assert_eq!(store.keys().await, vec!["s1", "string/s1"]);
        assert_eq!(
            registry.lookup_typed::<String>("s1").await.unwrap(),
            Some("hello".to_string())
        );
    }

    #[tokio::test]
    async fn test_put_replaces_bookmark_on_type_change() {
        let store = MemoryStore::new();
        let registry = registry_over(&store);

        registry.put("k", &"text".to_string()).await.unwrap();
        registry.put("k", &7i64).await.unwrap();

        assert_eq!(store.keys().await, vec!["i64/k", "k"]);
        assert!(registry.find_by_type::<String>().await.unwrap().is_empty());
        assert_eq!(registry.find_by_type::<i64>().await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_lookup_of_unstorable_key_is_none() {
        let store = MemoryStore::new();
        let registry = registry_over(&store);
        registry.put("s1", &"hello".to_string()).await.unwrap();

        // "string/s1" exists in the store, but only as a bookmark
        for key in ["", "a/b", "string/never", "string/s1"] {
            assert!(registry.lookup(key).await.unwrap().is_none());
            assert!(registry.lookup_typed::<String>(key).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_put_rejects_unreadable_type_tag() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Blank(u8);
        impl Tagged for Blank {
            const TYPE_TAG: &'static str = "";
        }

        let store = MemoryStore::new();
        let registry = registry_over(&store);

        let err = registry.put("k", &Blank(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTypeTag { .. }));
        assert!(store.is_empty().await);
        assert_eq!(store.sessions_count().await, 0);
    }

    #[tokio::test]
    async fn test_mutations_reject_invalid_key() {
        let registry = registry_over(&MemoryStore::new());
        for key in ["", "a/b"] {
            let err = registry.put(key, &1u32).await.unwrap_err();
            assert!(matches!(err, Error::InvalidKey { .. }));
            let err = registry.remove(key).await.unwrap_err();
            assert!(matches!(err, Error::InvalidKey { .. }));
        }
    }

    #[tokio::test]
    async fn test_lookup_typed_mismatch() {
        let registry = registry_over(&MemoryStore::new());
        registry.put("k", &"text".to_string()).await.unwrap();

        let err = registry.lookup_typed::<i64>("k").await.unwrap_err();
        match err {
            Error::TypeMismatch {
                key,
                requested,
                actual,
            } => {
                assert_eq!(key, "k");
                assert_eq!(requested, "i64");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remove_absent_is_not_found() {
        let registry = registry_over(&MemoryStore::new());
        let err = registry.remove("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { ref key } if key == "missing"));
    }

    #[tokio::test]
    async fn test_find_by_tag_skips_dangling_bookmark() {
        let store = MemoryStore::new();
        let registry = registry_over(&store);

        registry.put("w1", &Widget { name: "a".into() }).await.unwrap();
        store.put("test.Widget/ghost", b"1").await.unwrap();

        let found = registry.find_by_tag(&TypeTag::of::<Widget>()).await.unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["w1"]);
    }

    #[tokio::test]
    async fn test_find_by_tag_skips_stale_bookmark() {
        let store = MemoryStore::new();
        let registry = registry_over(&store);

        registry.put("k", &5u32).await.unwrap();
        // Bookmark left over from an interrupted overwrite
        store.put("test.Widget/k", b"1").await.unwrap();

        assert!(registry.find_by_type::<Widget>().await.unwrap().is_empty());
        assert_eq!(registry.find_by_type::<u32>().await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_aliases_match_primary_operations() {
        let registry = registry_over(&MemoryStore::new());
        registry.put("w", &Widget { name: "a".into() }).await.unwrap();

        assert_eq!(
            registry.lookup_by_name("w").await.unwrap(),
            registry.lookup("w").await.unwrap()
        );
        assert_eq!(
            registry.lookup_by_name_and_type::<Widget>("w").await.unwrap(),
            Some(Widget { name: "a".into() })
        );
        let by_type = registry.lookup_by_type::<Widget>().await.unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type["w"].name, "a");
    }

    #[tokio::test]
    async fn test_object_source_is_dyn_compatible() {
        let registry = registry_over(&MemoryStore::new());
        registry.put("n", &1i32).await.unwrap();

        let source: Arc<dyn ObjectSource> = Arc::new(registry);
        let stored = source.lookup("n").await.unwrap().unwrap();
        assert_eq!(stored.type_tag().as_str(), "i32");
        assert_eq!(source.find_by_tag(stored.type_tag()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_fails_when_store_write_fails() {
        let memory = MemoryStore::new();
        let store = FaultyStore::new(memory.clone())
            .with_fault(FaultConfig::new(FaultType::StoreWriteFail));
        let registry = Registry::builder().with_store(store).build().unwrap();

        let err = registry.put("k", &1u64).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(memory.is_empty().await);
        assert_eq!(memory.sessions_count().await, 0);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Registry::builder()
            .with_config(RegistryConfig {
                value_size_bytes_max: 0,
            })
            .build();
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_builder_registers_subtypes() {
        let registry = Registry::builder()
            .with_subtype::<u32, u64>()
            .unwrap()
            .build()
            .unwrap();
        assert!(registry
            .hierarchy()
            .is_assignable(&TypeTag::of::<u32>(), &TypeTag::of::<u64>()));
    }

    #[test]
    fn test_from_config_memory_backend() {
        let registry = Registry::from_config(&KombuConfig::default()).unwrap();
        assert_eq!(registry.hierarchy().relations_count(), 0);
    }
}
