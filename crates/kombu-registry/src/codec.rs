//! Object codec
//!
//! Values are stored as a JSON envelope carrying the type tag next to the
//! value, so a reader can check type compatibility before deserializing:
//!
//! ```text
//! {"type":"com.example.Widget","value":{...}}
//! ```

use bytes::Bytes;
use kombu_core::{Error, RegistryConfig, Result, Tagged, TypeTag};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Borrowing form of the envelope, used on encode
#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    #[serde(rename = "type")]
    type_tag: &'a str,
    value: &'a T,
}

/// Owned form of the envelope, used on decode
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_tag: TypeTag,
    value: Value,
}

/// A decoded registry entry whose concrete type is known only by its tag
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    key: String,
    type_tag: TypeTag,
    value: Value,
}

impl StoredObject {
    /// Key the object was stored under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tag of the stored object's type
    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// The stored value as a JSON document
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Deserialize the value as `T`
    ///
    /// Does not check the tag; the registry does that against its type
    /// hierarchy before calling this.
    pub fn into_typed<T: Tagged>(self) -> Result<T> {
        serde_json::from_value(self.value).map_err(|e| {
            Error::corrupt_payload(
                self.key,
                format!("cannot read {} as {}: {}", self.type_tag, T::TYPE_TAG, e),
            )
        })
    }
}

/// Serializes objects into payloads and back
#[derive(Debug, Clone)]
pub struct ObjectCodec {
    value_size_bytes_max: usize,
}

impl ObjectCodec {
    /// Create a codec enforcing the configured payload limit
    pub fn new(config: &RegistryConfig) -> Self {
        assert!(config.value_size_bytes_max > 0, "value size limit must be positive");
        Self {
            value_size_bytes_max: config.value_size_bytes_max,
        }
    }

    /// Owned copy of `object`, independent of the caller's instance
    pub fn clone_object<T: Tagged>(&self, object: &T) -> T {
        object.clone()
    }

    /// Encode `object` with its type tag
    ///
    /// Fails with [`Error::InvalidTypeTag`] if `T::TYPE_TAG` would not decode.
    pub fn encode<T: Tagged>(&self, object: &T) -> Result<Bytes> {
        let tag = TypeTag::new(T::TYPE_TAG)?;
        let envelope = EnvelopeRef {
            type_tag: tag.as_str(),
            value: object,
        };

        let payload = serde_json::to_vec(&envelope).map_err(|e| Error::NotSerializable {
            type_tag: T::TYPE_TAG.to_string(),
            reason: e.to_string(),
        })?;

        if payload.len() > self.value_size_bytes_max {
            return Err(Error::ValueTooLarge {
                size: payload.len(),
                limit: self.value_size_bytes_max,
            });
        }

        // Postcondition
        debug_assert!(!payload.is_empty());
        Ok(Bytes::from(payload))
    }

    /// Decode the payload stored under `key`
    pub fn decode(&self, key: &str, payload: &[u8]) -> Result<StoredObject> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| Error::corrupt_payload(key, e.to_string()))?;

        if envelope.type_tag.as_str().is_empty() {
            return Err(Error::corrupt_payload(key, "empty type tag"));
        }

        Ok(StoredObject {
            key: key.to_string(),
            type_tag: envelope.type_tag,
            value: envelope.value,
        })
    }
}

impl Default for ObjectCodec {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}
