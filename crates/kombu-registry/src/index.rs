//! Secondary index of stored objects by type tag
//!
//! TigerStyle: Explicit key encoding, bounded sizes.
//!
//! # Key Space Design
//!
//! Every stored object occupies two keys:
//! ```text
//! <key>                    -> encoded payload       (primary entry)
//! <escaped-type-tag>/<key> -> "1"                   (bookmark)
//! ```
//!
//! Listing the prefix `<escaped-type-tag>/` enumerates every key stored with
//! that tag without touching unrelated entries. Keys never contain `/`, so
//! the original key is always the part after the last separator.

use bytes::Bytes;
use kombu_core::{
    Error, Result, TypeTag, BOOKMARK_MARKER, KEY_LENGTH_BYTES_MAX, KEY_SEPARATOR,
    STORE_KEY_LENGTH_BYTES_MAX,
};
use kombu_storage::KvStore;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Percent-escape a type tag for use as a store key segment
///
/// `%`, `/` and `$` are always escaped, as is every byte that is not printable
/// ASCII. The result never contains the key separator.
pub fn escape_type_tag(tag: &TypeTag) -> String {
    let mut escaped = String::with_capacity(tag.as_str().len());

    for ch in tag.as_str().chars() {
        if ch.is_ascii_graphic() && !matches!(ch, '%' | '$' | KEY_SEPARATOR) {
            escaped.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                // Writing to a String cannot fail
                let _ = write!(escaped, "%{:02X}", byte);
            }
        }
    }

    // Postcondition
    debug_assert!(!escaped.contains(KEY_SEPARATOR));
    escaped
}

/// Bookmark key for `key` stored with `tag`
pub fn bookmark_key_for(tag: &TypeTag, key: &str) -> String {
    debug_assert!(!key.contains(KEY_SEPARATOR), "key cannot contain separator");
    format!("{}{}{}", escape_type_tag(tag), KEY_SEPARATOR, key)
}

/// Store prefix under which all bookmarks for `tag` live
///
/// Includes the trailing separator so that `Foo` does not match `FooBar`.
pub fn key_prefix_for(tag: &TypeTag) -> String {
    format!("{}{}", escape_type_tag(tag), KEY_SEPARATOR)
}

/// Recover the original key from a bookmark key
///
/// Only the last separator delimits the key; everything before it belongs to
/// the (possibly hierarchical) type part.
pub fn extract_original_key(bookmark_key: &str) -> &str {
    match bookmark_key.rfind(KEY_SEPARATOR) {
        Some(pos) => &bookmark_key[pos + KEY_SEPARATOR.len_utf8()..],
        None => bookmark_key,
    }
}

/// Check that `key` can be used as a registry key
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key cannot be empty"));
    }
    if key.len() > KEY_LENGTH_BYTES_MAX {
        return Err(Error::invalid_key(
            key,
            format!(
                "{} bytes exceeds limit of {} bytes",
                key.len(),
                KEY_LENGTH_BYTES_MAX
            ),
        ));
    }
    if key.contains(KEY_SEPARATOR) {
        return Err(Error::invalid_key(
            key,
            format!("key cannot contain '{}'", KEY_SEPARATOR),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::invalid_key(key, "key cannot contain control characters"));
    }
    Ok(())
}

/// Keeps primary entries and their bookmarks in step
#[derive(Clone)]
pub struct IndexMaintainer {
    store: Arc<dyn KvStore>,
}

impl IndexMaintainer {
    /// Create a maintainer over `store`
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write the primary entry for `key`, then its bookmark
    ///
    /// If the bookmark cannot be written the primary entry is removed again,
    /// so a failed call leaves neither record behind.
    pub async fn write_pair(&self, key: &str, tag: &TypeTag, payload: &Bytes) -> Result<()> {
        // Preconditions
        debug_assert!(validate_key(key).is_ok());
        assert!(!payload.is_empty(), "payload cannot be empty");

        let bookmark = bookmark_key_for(tag, key);
        if bookmark.len() > STORE_KEY_LENGTH_BYTES_MAX {
            return Err(Error::invalid_key(
                key,
                format!(
                    "bookmark of {} bytes exceeds limit of {} bytes",
                    bookmark.len(),
                    STORE_KEY_LENGTH_BYTES_MAX
                ),
            ));
        }

        self.store.put(key, payload).await?;

        if let Err(e) = self.store.put(&bookmark, BOOKMARK_MARKER).await {
            warn!(key, bookmark = %bookmark, error = %e, "Bookmark write failed, rolling back entry");
            if let Err(rollback) = self.store.delete(key).await {
                warn!(key, error = %rollback, "Rollback of primary entry failed");
            }
            return Err(e);
        }

        debug!(key, bookmark = %bookmark, "Entry and bookmark written");
        Ok(())
    }

    /// Delete the primary entry for `key`, then its bookmark under `tag`
    pub async fn delete_pair(&self, key: &str, tag: &TypeTag) -> Result<()> {
        debug_assert!(validate_key(key).is_ok());

        let bookmark = bookmark_key_for(tag, key);

        self.store.delete(key).await?;
        self.store.delete(&bookmark).await?;

        debug!(key, bookmark = %bookmark, "Entry and bookmark deleted");
        Ok(())
    }

    /// Original keys of every bookmark filed under `tag`
    pub async fn bookmarked_keys(&self, tag: &TypeTag) -> Result<Vec<String>> {
        let prefix = key_prefix_for(tag);
        let bookmarks = self.store.list_keys(&prefix).await?;

        Ok(bookmarks
            .iter()
            .filter(|bookmark| bookmark.starts_with(&prefix))
            .map(|bookmark| extract_original_key(bookmark))
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl std::fmt::Debug for IndexMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexMaintainer").finish_non_exhaustive()
    }
}
