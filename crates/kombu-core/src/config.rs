//! Configuration for Kombu
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for Kombu
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KombuConfig {
    /// Store backend configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Registry behavior configuration
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl KombuConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.registry.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::InvalidConfiguration {
            field: "<document>".into(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `KOMBU_CONSUL_HOST`: Consul agent host; selects the Consul backend when set
    /// - `KOMBU_CONSUL_PORT`: Consul agent port (default: 8500)
    /// - `KOMBU_CONSUL_TOKEN`: ACL token sent with every request
    /// - `KOMBU_CONSUL_DATACENTER`: datacenter to address
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("KOMBU_CONSUL_HOST") {
            config.store.backend = StoreBackend::Consul;
            config.store.consul.host = host;
        }

        if let Ok(port) = std::env::var("KOMBU_CONSUL_PORT") {
            config.store.consul.port = port.parse().map_err(|_| Error::InvalidConfiguration {
                field: "store.consul.port".into(),
                reason: format!("'{}' is not a valid port", port),
            })?;
        }

        config.store.consul.token = std::env::var("KOMBU_CONSUL_TOKEN").ok();
        config.store.consul.datacenter = std::env::var("KOMBU_CONSUL_DATACENTER").ok();

        config.validate()?;
        Ok(config)
    }
}

/// Store backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend type
    #[serde(default)]
    pub backend: StoreBackend,

    /// Consul agent settings (for Consul backend)
    #[serde(default)]
    pub consul: ConsulConfig,
}

/// Store backend type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-memory store (for testing and single-process use)
    #[default]
    Memory,

    /// Consul KV store reached through the agent HTTP API
    Consul,
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Consul {
            self.consul.validate()?;
        }
        Ok(())
    }
}

/// Consul agent connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Agent host name or address
    #[serde(default = "default_consul_host")]
    pub host: String,

    /// Agent HTTP port
    #[serde(default = "default_consul_port")]
    pub port: u16,

    /// URL scheme, `http` or `https`
    #[serde(default = "default_consul_scheme")]
    pub scheme: String,

    /// ACL token (sent as `X-Consul-Token`)
    #[serde(default)]
    pub token: Option<String>,

    /// Datacenter to address (agent's own when unset)
    #[serde(default)]
    pub datacenter: Option<String>,

    /// HTTP request timeout (milliseconds)
    #[serde(default = "default_consul_timeout_ms")]
    pub timeout_ms: u64,

    /// Store prefix under which lock keys are kept
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,

    /// Session TTL (seconds); bounds how long a crashed writer holds a lock
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
}

fn default_consul_host() -> String {
    CONSUL_HOST_DEFAULT.to_string()
}

fn default_consul_port() -> u16 {
    CONSUL_PORT_DEFAULT
}

fn default_consul_scheme() -> String {
    "http".to_string()
}

fn default_consul_timeout_ms() -> u64 {
    CONSUL_TIMEOUT_MS_DEFAULT
}

fn default_lock_prefix() -> String {
    LOCK_PREFIX_DEFAULT.to_string()
}

fn default_session_ttl_seconds() -> u64 {
    SESSION_TTL_SECONDS_DEFAULT
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            host: default_consul_host(),
            port: default_consul_port(),
            scheme: default_consul_scheme(),
            token: None,
            datacenter: None,
            timeout_ms: default_consul_timeout_ms(),
            lock_prefix: default_lock_prefix(),
            session_ttl_seconds: default_session_ttl_seconds(),
        }
    }
}

impl ConsulConfig {
    /// Create a config for the given agent host with default port
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the agent port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the ACL token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL of the agent HTTP API, e.g. `http://localhost:8500`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "store.consul.host".into(),
                reason: "cannot be empty".into(),
            });
        }

        if self.port == 0 {
            return Err(Error::InvalidConfiguration {
                field: "store.consul.port".into(),
                reason: "cannot be 0".into(),
            });
        }

        if self.scheme != "http" && self.scheme != "https" {
            return Err(Error::InvalidConfiguration {
                field: "store.consul.scheme".into(),
                reason: format!("'{}' must be http or https", self.scheme),
            });
        }

        if self.timeout_ms == 0 || self.timeout_ms > CONSUL_TIMEOUT_MS_MAX {
            return Err(Error::InvalidConfiguration {
                field: "store.consul.timeout_ms".into(),
                reason: format!("must be in 1..={}", CONSUL_TIMEOUT_MS_MAX),
            });
        }

        if self.lock_prefix.is_empty() || !self.lock_prefix.ends_with(KEY_SEPARATOR) {
            return Err(Error::InvalidConfiguration {
                field: "store.consul.lock_prefix".into(),
                reason: format!("must be non-empty and end with '{}'", KEY_SEPARATOR),
            });
        }

        if !(SESSION_TTL_SECONDS_MIN..=SESSION_TTL_SECONDS_MAX).contains(&self.session_ttl_seconds) {
            return Err(Error::InvalidConfiguration {
                field: "store.consul.session_ttl_seconds".into(),
                reason: format!(
                    "{} outside {}..={}",
                    self.session_ttl_seconds, SESSION_TTL_SECONDS_MIN, SESSION_TTL_SECONDS_MAX
                ),
            });
        }

        Ok(())
    }
}

/// Registry behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum size of an encoded payload (bytes)
    #[serde(default = "default_value_size_bytes_max")]
    pub value_size_bytes_max: usize,
}

fn default_value_size_bytes_max() -> usize {
    VALUE_SIZE_BYTES_MAX
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            value_size_bytes_max: default_value_size_bytes_max(),
        }
    }
}

impl RegistryConfig {
    fn validate(&self) -> Result<()> {
        if self.value_size_bytes_max == 0 || self.value_size_bytes_max > VALUE_SIZE_BYTES_MAX {
            return Err(Error::InvalidConfiguration {
                field: "registry.value_size_bytes_max".into(),
                reason: format!("must be in 1..={}", VALUE_SIZE_BYTES_MAX),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KombuConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_consul_defaults() {
        let consul = ConsulConfig::new("consul.local");
        assert_eq!(consul.port, 8500);
        assert_eq!(consul.base_url(), "http://consul.local:8500");
    }

    #[test]
    fn test_consul_requires_host() {
        let mut config = KombuConfig::default();
        config.store.backend = StoreBackend::Consul;
        config.store.consul.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_session_ttl() {
        let mut config = KombuConfig::default();
        config.store.backend = StoreBackend::Consul;
        config.store.consul.session_ttl_seconds = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_str() {
        let config = KombuConfig::from_json_str(
            r#"{ "store": { "backend": "consul", "consul": { "host": "10.0.0.5", "port": 8501 } } }"#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Consul);
        assert_eq!(config.store.consul.base_url(), "http://10.0.0.5:8501");
        assert_eq!(config.store.consul.lock_prefix, LOCK_PREFIX_DEFAULT);

        assert!(KombuConfig::from_json_str("{ not json").is_err());
        assert!(KombuConfig::from_json_str(r#"{ "registry": { "value_size_bytes_max": 0 } }"#).is_err());
    }
}
