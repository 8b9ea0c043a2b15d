//! The external addon package store.
//!
//! Persisted addon packages and the unpacker that turns them into
//! `{manifest, files}` bundles live outside this subsystem. The loader only
//! needs to enumerate what is installed, so the contract is a single-method
//! trait plus an in-memory implementation for tests and tooling.

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use moneta_addon_core::AddonBundle;

/// Errors from the external package store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not enumerate installed addons.
    #[error("package store unavailable: {0}")]
    Unavailable(String),
}

/// Source of installed addon bundles.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Lists every installed addon as an unpacked bundle.
    async fn list_installed(&self) -> Result<Vec<AddonBundle>, StoreError>;
}

/// In-memory [`PackageStore`] for tests and local tooling.
#[derive(Default)]
pub struct MemoryPackageStore {
    bundles: RwLock<Vec<AddonBundle>>,
}

impl MemoryPackageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bundle to the installed set.
    pub fn insert(&self, bundle: AddonBundle) {
        self.bundles.write().push(bundle);
    }
}

#[async_trait]
impl PackageStore for MemoryPackageStore {
    async fn list_installed(&self) -> Result<Vec<AddonBundle>, StoreError> {
        Ok(self.bundles.read().clone())
    }
}
