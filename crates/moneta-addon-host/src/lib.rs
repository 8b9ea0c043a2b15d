//! Addon execution engine for Moneta.
//!
//! This crate turns unpacked addon packages into live extensions of the host
//! UI: it evaluates their main modules in-process, hands each one a freshly
//! built capability object, and tracks everything they register so teardown
//! is exact.
//!
//! - [`bridge`] — the versioned, grouped Host API facade over the flat
//!   record of internal command functions.
//! - [`capability`] — per-addon capability objects and the script-facing
//!   bindings.
//! - [`script`] — module evaluation and entry-point resolution.
//! - [`store`] — the external package store contract.
//! - [`loader`] — the addon lifecycle (discover → validate → enable →
//!   unload).

pub mod bridge;
pub mod capability;
pub mod loader;
pub mod script;
pub mod store;

pub use bridge::{
    CommandError, CommandResult, CommandUnavailable, EventHandler, HostApiBridge, HostCommands,
    HostCommandsBuilder, QueryClient, SubscribeFn, Unlisten,
};
pub use capability::{AddonContext, CapabilityFactory, build_engine};
pub use loader::{
    AddonLoader, AddonSource, CompatPolicy, HOST_SDK_VERSION, LoadReport, LoadedAddon,
    LoadedAddonInfo,
};
pub use script::{DEFAULT_EXPORT, ENTRY_ALIASES, EntryPoint, ScriptError, ScriptModule};
pub use store::{MemoryPackageStore, PackageStore, StoreError};
