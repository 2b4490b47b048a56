//! Consul KV storage backend
//!
//! Talks to a Consul agent over its HTTP API (v1).
//!
//! # Key Space Design
//!
//! Keys are used as-is; every `/`-separated segment is percent-encoded in the
//! request path so Consul stores exactly the key it was given:
//! ```text
//! GET    /v1/kv/<key>?raw              -> value bytes, 404 when absent
//! PUT    /v1/kv/<key>                  -> store value
//! DELETE /v1/kv/<key>                  -> remove value
//! GET    /v1/kv/<prefix>?keys          -> JSON array of keys, 404 when none
//! PUT    /v1/session/create            -> {"ID": "..."}
//! PUT    /v1/session/destroy/<id>
//! PUT    /v1/kv/<lock_prefix><name>?acquire=<id>  -> true | false
//! PUT    /v1/kv/<lock_prefix><name>?release=<id>  -> true | false
//! DELETE /v1/kv/<lock_prefix><name>?cas=<index>   -> true | false
//! ```
//!
//! Releasing a lock leaves its key in place, so `release_lock` reads the key
//! back and deletes it with a check-and-set on its `ModifyIndex`. A session
//! that acquired the lock in between changes the index and keeps the key.
//!
//! # Example
//!
//! ```ignore
//! use kombu_core::ConsulConfig;
//! use kombu_storage::ConsulStore;
//!
//! let store = ConsulStore::connect(ConsulConfig::new("consul.local"))?;
//! store.put("greeting", b"hello").await?;
//! ```

use crate::kv::{KvStore, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use kombu_core::{ConsulConfig, Error, Result, KEY_SEPARATOR};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Header carrying the ACL token
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

/// Session name shown in the Consul UI
const SESSION_NAME: &str = "kombu-registry";

/// Body of `PUT /v1/session/create`
#[derive(Debug, Serialize)]
struct SessionCreateRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
    #[serde(rename = "LockDelay")]
    lock_delay: &'a str,
}

/// Response of `PUT /v1/session/create`
#[derive(Debug, Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Entry metadata returned by `GET /v1/kv/<key>` (without `?raw`)
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
    #[serde(rename = "Session", default)]
    session: Option<String>,
}

impl KvEntry {
    /// Index to delete a lock key at, if no session holds it
    fn unheld_index(entries: &[KvEntry]) -> Option<u64> {
        match entries {
            [entry] if entry.session.is_none() => Some(entry.modify_index),
            _ => None,
        }
    }
}

/// Consul KV store
///
/// Cheap to clone; clones share the underlying HTTP connection pool.
#[derive(Clone)]
pub struct ConsulStore {
    client: reqwest::Client,
    config: ConsulConfig,
    base_url: String,
}

impl ConsulStore {
    /// Build a store for the agent described by `config`
    ///
    /// No request is made until the first operation.
    pub fn connect(config: ConsulConfig) -> Result<Self> {
        assert!(!config.host.is_empty(), "consul host cannot be empty");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Internal {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        let base_url = config.base_url();
        debug!(base_url = %base_url, "Consul store configured");

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Agent host
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Agent port
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// URL of a KV entry, each path segment percent-encoded
    fn kv_url(&self, key: &str) -> String {
        let encoded: Vec<_> = key
            .split(KEY_SEPARATOR)
            .map(urlencoding::encode)
            .collect();
        format!("{}/v1/kv/{}", self.base_url, encoded.join("/"))
    }

    /// Store key that backs lock `name`
    fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.config.lock_prefix, name)
    }

    /// Attach token and datacenter to a request
    fn decorate(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.config.token {
            request = request.header(CONSUL_TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.config.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        request
    }

    /// Send a request, mapping transport failures and non-2xx statuses
    ///
    /// A 404 is passed through; the caller decides what absence means.
    async fn send(
        &self,
        request: RequestBuilder,
        key: &str,
        to_error: fn(String, String) -> Error,
    ) -> Result<Response> {
        let response = self
            .decorate(request)
            .send()
            .await
            .map_err(|e| to_error(key.to_string(), e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(to_error(
            key.to_string(),
            format!("consul returned {}: {}", status, body.trim()),
        ))
    }

    /// `DELETE` of `lock_key` that only applies at `modify_index`
    fn lock_delete_request(&self, lock_key: &str, modify_index: u64) -> RequestBuilder {
        self.client
            .delete(self.kv_url(lock_key))
            .query(&[("cas", modify_index)])
    }

    /// Delete the key backing a released lock, unless it was re-acquired
    async fn remove_lock_key(&self, lock_key: &str) -> Result<()> {
        let request = self.client.get(self.kv_url(lock_key));
        let response = self.send(request, lock_key, session_failed).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let entries: Vec<KvEntry> = response
            .json()
            .await
            .map_err(|e| Error::session_failed(format!("invalid lock entry: {}", e)))?;
        let Some(modify_index) = KvEntry::unheld_index(&entries) else {
            debug!(lock_key, "Lock held again, keeping key");
            return Ok(());
        };

        let response = self
            .send(
                self.lock_delete_request(lock_key, modify_index),
                lock_key,
                session_failed,
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::session_failed(e.to_string()))?;
        if Self::parse_bool(&body) != Some(true) {
            debug!(lock_key, modify_index, "Lock key changed, keeping it");
        }
        Ok(())
    }

    /// Parse the `true`/`false` body of lock and put requests
    fn parse_bool(body: &str) -> Option<bool> {
        match body.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ConsulStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulStore")
            .field("base_url", &self.base_url)
            .field("datacenter", &self.config.datacenter)
            .finish()
    }
}

fn read_failed(key: String, reason: String) -> Error {
    Error::StorageReadFailed { key, reason }
}

fn write_failed(key: String, reason: String) -> Error {
    Error::StorageWriteFailed { key, reason }
}

fn session_failed(_key: String, reason: String) -> Error {
    Error::SessionFailed { reason }
}

#[async_trait]
impl KvStore for ConsulStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let request = self.client.get(self.kv_url(key)).query(&[("raw", "true")]);
        let response = self.send(request, key, read_failed).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let value = response
            .bytes()
            .await
            .map_err(|e| Error::storage_read_failed(key, e.to_string()))?;
        debug!(value_len = value.len(), "Consul get");
        Ok(Some(value))
    }

    #[instrument(skip(self, value), fields(value_len = value.len()))]
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let request = self.client.put(self.kv_url(key)).body(value.to_vec());
        let response = self.send(request, key, write_failed).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::storage_write_failed(key, "consul returned 404"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        let request = self.client.delete(self.kv_url(key));
        self.send(request, key, write_failed).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let request = self
            .client
            .get(self.kv_url(prefix))
            .query(&[("keys", "true")]);
        let response = self.send(request, prefix, read_failed).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = response
            .json()
            .await
            .map_err(|e| Error::storage_read_failed(prefix, e.to_string()))?;
        debug!(count = keys.len(), "Consul list keys");
        Ok(keys)
    }

    async fn create_session(&self) -> Result<SessionId> {
        let body = SessionCreateRequest {
            name: SESSION_NAME,
            ttl: format!("{}s", self.config.session_ttl_seconds),
            behavior: "release",
            lock_delay: "0s",
        };
        let request = self
            .client
            .put(format!("{}/v1/session/create", self.base_url))
            .json(&body);
        let response = self.send(request, "", session_failed).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::session_failed("session endpoint not found"));
        }

        let created: SessionCreateResponse = response
            .json()
            .await
            .map_err(|e| Error::session_failed(format!("invalid session response: {}", e)))?;
        debug!(session = %created.id, "Consul session created");
        Ok(SessionId::new(created.id))
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<()> {
        let request = self.client.put(format!(
            "{}/v1/session/destroy/{}",
            self.base_url,
            urlencoding::encode(session.as_str())
        ));
        self.send(request, "", session_failed).await?;
        debug!(session = %session, "Consul session destroyed");
        Ok(())
    }

    #[instrument(skip(self, session), fields(session = %session))]
    async fn acquire_lock(&self, session: &SessionId, name: &str) -> Result<bool> {
        let lock_key = self.lock_key(name);
        let request = self
            .client
            .put(self.kv_url(&lock_key))
            .query(&[("acquire", session.as_str())])
            .body(session.as_str().to_string());
        let response = self.send(request, &lock_key, session_failed).await?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::session_failed(e.to_string()))?;
        Self::parse_bool(&body)
            .ok_or_else(|| Error::session_failed(format!("unexpected acquire response: {}", body)))
    }

    #[instrument(skip(self, session), fields(session = %session))]
    async fn release_lock(&self, session: &SessionId, name: &str) -> Result<()> {
        let lock_key = self.lock_key(name);
        let request = self
            .client
            .put(self.kv_url(&lock_key))
            .query(&[("release", session.as_str())]);
        self.send(request, &lock_key, session_failed).await?;

        if let Err(e) = self.remove_lock_key(&lock_key).await {
            warn!(lock_key = %lock_key, error = %e, "Lock key cleanup failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConsulStore {
        ConsulStore::connect(ConsulConfig::new("consul.local")).unwrap()
    }

    #[test]
    fn test_kv_url_plain_key() {
        assert_eq!(
            store().kv_url("stringTestKey"),
            "http://consul.local:8500/v1/kv/stringTestKey"
        );
    }

    #[test]
    fn test_kv_url_keeps_hierarchy_and_encodes_segments() {
        let url = store().kv_url("com.example.Outer%24Inner/my key");
        assert_eq!(
            url,
            "http://consul.local:8500/v1/kv/com.example.Outer%2524Inner/my%20key"
        );
    }

    #[test]
    fn test_kv_url_prefix_with_trailing_separator() {
        assert_eq!(
            store().kv_url("string/"),
            "http://consul.local:8500/v1/kv/string/"
        );
    }

    #[test]
    fn test_lock_key_uses_prefix() {
        assert_eq!(store().lock_key("uniqueKey"), "kombu-locks/uniqueKey");
    }

    #[test]
    fn test_lock_delete_is_check_and_set() {
        let store = ConsulStore::connect(
            ConsulConfig::new("consul.local").with_token("secret"),
        )
        .unwrap();
        let request = store
            .decorate(store.lock_delete_request("kombu-locks/uniqueKey", 42))
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::DELETE);
        assert_eq!(
            request.url().as_str(),
            "http://consul.local:8500/v1/kv/kombu-locks/uniqueKey?cas=42"
        );
        assert_eq!(request.headers()[CONSUL_TOKEN_HEADER], "secret");
    }

    #[test]
    fn test_only_unheld_lock_keys_are_deleted() {
        let released: Vec<KvEntry> = serde_json::from_str(
            r#"[{"Key":"kombu-locks/k","ModifyIndex":17,"Flags":0,"Value":"c2Vzcw=="}]"#,
        )
        .unwrap();
        assert_eq!(KvEntry::unheld_index(&released), Some(17));

        let reacquired: Vec<KvEntry> = serde_json::from_str(
            r#"[{"Key":"kombu-locks/k","ModifyIndex":18,"Session":"adf4238a-882b-9ddc-4a9d-5b6758e4159e"}]"#,
        )
        .unwrap();
        assert_eq!(KvEntry::unheld_index(&reacquired), None);
        assert_eq!(KvEntry::unheld_index(&[]), None);
    }

    #[test]
    fn test_accessors() {
        let store = ConsulStore::connect(ConsulConfig::new("10.1.2.3").with_port(8501)).unwrap();
        assert_eq!(store.host(), "10.1.2.3");
        assert_eq!(store.port(), 8501);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(ConsulStore::parse_bool("true"), Some(true));
        assert_eq!(ConsulStore::parse_bool("false\n"), Some(false));
        assert_eq!(ConsulStore::parse_bool("maybe"), None);
    }

    #[test]
    fn test_session_request_shape() {
        let body = SessionCreateRequest {
            name: SESSION_NAME,
            ttl: "15s".into(),
            behavior: "release",
            lock_delay: "0s",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["TTL"], "15s");
        assert_eq!(json["Behavior"], "release");

        let created: SessionCreateResponse =
            serde_json::from_str(r#"{"ID":"adf4238a-882b-9ddc-4a9d-5b6758e4159e"}"#).unwrap();
        assert_eq!(created.id, "adf4238a-882b-9ddc-4a9d-5b6758e4159e");
    }
}
