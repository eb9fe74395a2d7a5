//! Cache keys, configuration hashing and log fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hash used for an absent, null or empty configuration.
///
/// Not valid hex, so it can never collide with a real digest.
pub const EMPTY_CONFIG_HASH: &str = "__empty_config__";

/// Hash used when a configuration cannot be serialized.
pub const HASH_FAILURE_MARKER: &str = "__hash_failure__";

/// Hex length of a configuration hash
pub const CONFIG_HASH_LEN: usize = 16;

/// Hex length of credential fingerprints stored in key-health records
pub const CREDENTIAL_FINGERPRINT_LEN: usize = 16;

/// Hex length of fingerprints written to logs
pub const LOG_FINGERPRINT_LEN: usize = 8;

/// Which cache scope a request reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Shared across every user, permanent tier
    Shared,
    /// Per-configuration bypass tier
    User(String),
}

impl Scope {
    /// Is this the per-user bypass scope
    pub fn is_user(&self) -> bool {
        matches!(self, Scope::User(_))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Shared => write!(f, "shared"),
            Scope::User(hash) => write!(f, "user:{}", hash),
        }
    }
}

/// Logical translation cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    item_id: String,
    target_language: String,
    scope: Scope,
}

impl CacheKey {
    /// Create a key with an explicit scope
    pub fn new(item_id: impl Into<String>, target_language: impl AsRef<str>, scope: Scope) -> Self {
        Self {
            item_id: item_id.into(),
            target_language: normalize_language(target_language.as_ref()),
            scope,
        }
    }

    /// Key in the shared scope
    pub fn shared(item_id: impl Into<String>, target_language: impl AsRef<str>) -> Self {
        Self::new(item_id, target_language, Scope::Shared)
    }

    /// Key in the caller's bypass scope
    pub fn user(
        item_id: impl Into<String>,
        target_language: impl AsRef<str>,
        config_hash: impl Into<String>,
    ) -> Self {
        Self::new(item_id, target_language, Scope::User(config_hash.into()))
    }

    /// Key for a request: bypass callers get their own scope, everyone else shares.
    pub fn for_request(
        item_id: impl Into<String>,
        target_language: impl AsRef<str>,
        config_hash: &str,
        bypass: bool,
    ) -> Self {
        if bypass {
            Self::user(item_id, target_language, config_hash)
        } else {
            Self::shared(item_id, target_language)
        }
    }

    /// Source item id
    #[inline]
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Normalized target language
    #[inline]
    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Scope
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Key inside the store namespace of this key's tier
    pub fn storage_key(&self) -> String {
        match &self.scope {
            Scope::Shared => format!("{}_{}", self.item_id, self.target_language),
            Scope::User(hash) => format!("{}_{}__u_{}", self.item_id, self.target_language, hash),
        }
    }

    /// Short opaque fingerprint for logs
    pub fn fingerprint(&self) -> String {
        log_fingerprint(&self.storage_key())
    }
}

impl std::fmt::Display for CacheKey {
    // Never prints the raw key; user scopes embed the config hash.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key#{}", self.fingerprint())
    }
}

fn normalize_language(lang: &str) -> String {
    lang.trim().to_ascii_lowercase()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic digest of a caller's full configuration.
///
/// JSON objects are hashed with sorted keys, so field order never matters.
/// Never fails: empty configurations map to [`EMPTY_CONFIG_HASH`] and
/// unserializable ones to [`HASH_FAILURE_MARKER`].
pub fn config_hash<T: Serialize + ?Sized>(config: &T) -> String {
    let value = match serde_json::to_value(config) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Configuration could not be hashed, using failure marker");
            return HASH_FAILURE_MARKER.to_string();
        }
    };

    let empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if empty {
        return EMPTY_CONFIG_HASH.to_string();
    }

    // serde_json::Map is ordered by key, so this is canonical.
    match serde_json::to_vec(&value) {
        Ok(canonical) => {
            let mut digest = sha256_hex(&canonical);
            digest.truncate(CONFIG_HASH_LEN);
            digest
        }
        Err(e) => {
            warn!(error = %e, "Configuration could not be hashed, using failure marker");
            HASH_FAILURE_MARKER.to_string()
        }
    }
}

/// True for the sentinel hashes that do not identify a real configuration.
pub fn is_sentinel_hash(hash: &str) -> bool {
    hash == EMPTY_CONFIG_HASH || hash == HASH_FAILURE_MARKER
}

/// Fingerprint of a credential, used as its key-health record key.
pub fn credential_fingerprint(credential: &str) -> String {
    let mut digest = sha256_hex(credential.as_bytes());
    digest.truncate(CREDENTIAL_FINGERPRINT_LEN);
    digest
}

/// Short fingerprint of any sensitive string, for log fields.
pub fn log_fingerprint(raw: &str) -> String {
    let mut digest = sha256_hex(raw.as_bytes());
    digest.truncate(LOG_FINGERPRINT_LEN);
    digest
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_config_hash_is_deterministic_and_order_independent() {
        let a = json!({"sourceLanguages": ["eng"], "targetLanguages": ["spa"], "model": "flash"});
        let b = json!({"model": "flash", "targetLanguages": ["spa"], "sourceLanguages": ["eng"]});

        let ha = config_hash(&a);
        assert_eq!(ha, config_hash(&b));
        assert_eq!(ha.len(), CONFIG_HASH_LEN);
        assert!(ha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_config_hash_differs_by_content() {
        let a = json!({"model": "flash"});
        let b = json!({"model": "pro"});
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn test_empty_configs_map_to_sentinel() {
        assert_eq!(config_hash(&json!(null)), EMPTY_CONFIG_HASH);
        assert_eq!(config_hash(&json!({})), EMPTY_CONFIG_HASH);
        assert_eq!(config_hash(""), EMPTY_CONFIG_HASH);
        assert_eq!(config_hash(&Option::<u32>::None), EMPTY_CONFIG_HASH);
        assert!(is_sentinel_hash(EMPTY_CONFIG_HASH));
    }

    #[test]
    fn test_unserializable_config_maps_to_failure_marker() {
        // Non-string map keys cannot become JSON object keys.
        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8, 2], "x");
        assert_eq!(config_hash(&bad), HASH_FAILURE_MARKER);
        assert!(is_sentinel_hash(HASH_FAILURE_MARKER));
    }

    #[test]
    fn test_sentinels_are_distinct_and_not_hex() {
        assert_ne!(EMPTY_CONFIG_HASH, HASH_FAILURE_MARKER);
        assert!(!EMPTY_CONFIG_HASH.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!HASH_FAILURE_MARKER.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_storage_keys_by_scope() {
        let shared = CacheKey::shared("tt0133093", "SPA");
        assert_eq!(shared.target_language(), "spa");
        assert_eq!(shared.storage_key(), "tt0133093_spa");

        let user = CacheKey::user("tt0133093", "spa", "abc123");
        assert_eq!(user.storage_key(), "tt0133093_spa__u_abc123");
        assert_ne!(shared.storage_key(), user.storage_key());
    }

    #[test]
    fn test_for_request_scope_selection() {
        let bypass = CacheKey::for_request("tt1", "fre", "abc123", true);
        assert_eq!(bypass.scope(), &Scope::User("abc123".into()));

        let shared_a = CacheKey::for_request("tt1", "fre", "abc123", false);
        let shared_b = CacheKey::for_request("tt1", "fre", "def456", false);
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn test_display_hides_raw_key() {
        let key = CacheKey::user("tt1", "spa", "secretconfighash");
        let shown = key.to_string();
        assert!(!shown.contains("secretconfighash"));
        assert!(!shown.contains("tt1"));
        assert_eq!(key.fingerprint().len(), LOG_FINGERPRINT_LEN);
    }

    #[test]
    fn test_credential_fingerprint() {
        let fp = credential_fingerprint("sk-live-123");
        assert_eq!(fp.len(), CREDENTIAL_FINGERPRINT_LEN);
        assert_eq!(fp, credential_fingerprint("sk-live-123"));
        assert_ne!(fp, credential_fingerprint("sk-live-124"));
    }

    proptest! {
        #[test]
        fn prop_config_hash_never_empty(model in ".*", batch in 0u32..1000) {
            let hash = config_hash(&json!({"model": model, "batch": batch}));
            prop_assert!(!hash.is_empty());
            prop_assert_eq!(hash.len(), CONFIG_HASH_LEN);
        }

        #[test]
        fn prop_user_scopes_isolate(a in "[0-9a-f]{16}", b in "[0-9a-f]{16}") {
            prop_assume!(a != b);
            let ka = CacheKey::user("tt0133093", "spa", a);
            let kb = CacheKey::user("tt0133093", "spa", b);
            prop_assert_ne!(ka.storage_key(), kb.storage_key());
        }
    }
}
