//! Core types for the Moneta addon host.
//!
//! This crate is the leaf of the addon-host workspace: manifest and bundle
//! types produced by the external package unpacker, the process-wide
//! [`ContributionRegistry`] of dynamic UI contributions, per-addon
//! [`ScopedSecrets`] namespacing, and the error taxonomy shared by the
//! loader and dev manager.

pub mod error;
pub mod manifest;
pub mod registry;
pub mod secrets;

pub use error::{DynError, LoadError, SecretError};
pub use manifest::{AddonBundle, AddonFile, AddonManifest, DeclaredFunction, PermissionGrant};
pub use registry::{
    ClickHandler, ComponentRef, ContributionRegistry, DisableCallback, NavItem, NavItemSnapshot,
    RegistrySnapshot, RegistryStats, RemoveHandle, RouteEntry, RouteSnapshot, Subscription,
    DEFAULT_NAV_ORDER,
};
pub use secrets::{MemorySecretStore, ScopedSecrets, SecretStore};
