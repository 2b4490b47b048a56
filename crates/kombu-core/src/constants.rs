//! TigerStyle constants for Kombu
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Key Limits
// =============================================================================

/// Maximum length of a registry key in bytes
pub const KEY_LENGTH_BYTES_MAX: usize = 512;

/// Maximum length of a type tag in bytes (before escaping)
pub const TYPE_TAG_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a full store key in bytes (escaped tag + separator + key)
///
/// Escaping can triple the tag length in the worst case.
pub const STORE_KEY_LENGTH_BYTES_MAX: usize = TYPE_TAG_LENGTH_BYTES_MAX * 3 + 1 + KEY_LENGTH_BYTES_MAX;

/// Separator between the escaped type tag and the original key in a bookmark
pub const KEY_SEPARATOR: char = '/';

// =============================================================================
// Value Limits (aligned with Consul KV)
// =============================================================================

/// Maximum size of a stored value in bytes (512 KB - Consul KV limit)
pub const VALUE_SIZE_BYTES_MAX: usize = 512 * 1024;

/// Marker payload stored under every bookmark key
pub const BOOKMARK_MARKER: &[u8] = b"1";

// =============================================================================
// Type Hierarchy Limits
// =============================================================================

/// Maximum number of registered subtype relations
pub const TYPE_RELATIONS_COUNT_MAX: usize = 4096;

// =============================================================================
// Consul Defaults
// =============================================================================

/// Default Consul agent HTTP port
pub const CONSUL_PORT_DEFAULT: u16 = 8500;

/// Default Consul agent host
pub const CONSUL_HOST_DEFAULT: &str = "localhost";

/// Default HTTP request timeout for the Consul client in milliseconds (10 sec)
pub const CONSUL_TIMEOUT_MS_DEFAULT: u64 = 10 * 1000;

/// Maximum HTTP request timeout for the Consul client in milliseconds (5 min)
pub const CONSUL_TIMEOUT_MS_MAX: u64 = 5 * 60 * 1000;

/// Default store prefix under which lock keys are kept
pub const LOCK_PREFIX_DEFAULT: &str = "kombu-locks/";

/// Default session TTL in seconds (Consul accepts 10s..86400s)
pub const SESSION_TTL_SECONDS_DEFAULT: u64 = 15;

/// Minimum session TTL in seconds
pub const SESSION_TTL_SECONDS_MIN: u64 = 10;

/// Maximum session TTL in seconds (24 hours)
pub const SESSION_TTL_SECONDS_MAX: u64 = 24 * 60 * 60;

// Compile-time assertions for constant validity
const _: () = {
    assert!(KEY_LENGTH_BYTES_MAX >= 64);
    assert!(!BOOKMARK_MARKER.is_empty());
    assert!(SESSION_TTL_SECONDS_DEFAULT >= SESSION_TTL_SECONDS_MIN);
    assert!(SESSION_TTL_SECONDS_DEFAULT <= SESSION_TTL_SECONDS_MAX);
    assert!(CONSUL_TIMEOUT_MS_DEFAULT <= CONSUL_TIMEOUT_MS_MAX);
};
