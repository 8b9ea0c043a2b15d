//! Per-addon secret namespacing.
//!
//! The host stores addon secrets in an external store it does not own. The
//! store's keys are flat, so isolation between addons is enforced purely by a
//! key-prefix discipline: [`ScopedSecrets`] translates an addon's logical key
//! `K` into the store key `addon_<addonId>_<K>` and delegates. There is no
//! caching and no cross-addon read-through; store failures surface unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::SecretError;

// ─── SecretStore trait ────────────────────────────────────────────────────────

/// The external secret store consumed by the host.
///
/// Keys are opaque strings; all namespacing happens in [`ScopedSecrets`]
/// before the store ever sees a key.
pub trait SecretStore: Send + Sync {
    /// Writes `value` under `key`, replacing any existing value.
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError>;

    /// Reads the value stored under `key`. Missing keys are `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, SecretError>;

    /// Removes the value stored under `key`. Removing a missing key is a no-op.
    fn delete(&self, key: &str) -> Result<(), SecretError>;
}

// ─── ScopedSecrets ────────────────────────────────────────────────────────────

/// Secret accessor scoped to a single addon.
///
/// Built freshly for every enable as part of the capability object. Two
/// addons sharing a logical key name read disjoint values because the store
/// key is derived solely from the owning addon's id.
#[derive(Clone)]
pub struct ScopedSecrets {
    addon_id: String,
    store: Arc<dyn SecretStore>,
}

impl ScopedSecrets {
    /// Creates a namespace for `addon_id` over `store`.
    pub fn new(addon_id: impl Into<String>, store: Arc<dyn SecretStore>) -> Self {
        Self {
            addon_id: addon_id.into(),
            store,
        }
    }

    /// The owning addon's id.
    pub fn addon_id(&self) -> &str {
        &self.addon_id
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("addon_{}_{}", self.addon_id, key)
    }

    /// Stores `value` under the addon-scoped form of `key`.
    pub fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        self.store.set(&self.scoped_key(key), value)
    }

    /// Reads the value stored under the addon-scoped form of `key`.
    pub fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        self.store.get(&self.scoped_key(key))
    }

    /// Deletes the value stored under the addon-scoped form of `key`.
    pub fn delete(&self, key: &str) -> Result<(), SecretError> {
        self.store.delete(&self.scoped_key(key))
    }
}

impl std::fmt::Debug for ScopedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSecrets")
            .field("addon_id", &self.addon_id)
            .finish_non_exhaustive()
    }
}

// ─── MemorySecretStore ────────────────────────────────────────────────────────

/// In-memory [`SecretStore`] for tests and local development.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw view of every stored key, in no particular order.
    ///
    /// Exposed so tests can assert on the prefix discipline.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl SecretStore for MemorySecretStore {
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), SecretError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_key_prefix() {
        let store = Arc::new(MemorySecretStore::new());
        let secrets = ScopedSecrets::new("tracker", store.clone());
        secrets.set("token", "alpha").unwrap();

        assert_eq!(store.keys(), vec!["addon_tracker_token".to_string()]);
        assert_eq!(secrets.get("token").unwrap().as_deref(), Some("alpha"));
    }

    #[test]
    fn test_two_addons_share_logical_key_disjointly() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let a = ScopedSecrets::new("a", store.clone());
        let b = ScopedSecrets::new("b", store.clone());

        a.set("token", "alpha").unwrap();
        b.set("token", "beta").unwrap();

        assert_eq!(a.get("token").unwrap().as_deref(), Some("alpha"));
        assert_eq!(b.get("token").unwrap().as_deref(), Some("beta"));
    }

    #[test]
    fn test_delete_is_scoped() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let a = ScopedSecrets::new("a", store.clone());
        let b = ScopedSecrets::new("b", store.clone());

        a.set("token", "alpha").unwrap();
        b.set("token", "beta").unwrap();
        a.delete("token").unwrap();

        assert_eq!(a.get("token").unwrap(), None);
        assert_eq!(b.get("token").unwrap().as_deref(), Some("beta"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let secrets = ScopedSecrets::new("a", Arc::new(MemorySecretStore::new()));
        assert_eq!(secrets.get("absent").unwrap(), None);
    }
}
