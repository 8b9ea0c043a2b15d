//! # Moneta Addons
//!
//! The addon host of the Moneta personal-finance application: it discovers,
//! validates, executes, hot-reloads, and tears down third-party addons that
//! extend the host's navigation, routing, and data access surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌──────────────────┐
//! │  AddonHost   │────▶│   Loader   │────▶│ entry(capability)│
//! │ (orchestrator)│    │            │     └────────┬─────────┘
//! └──────┬───────┘     └─────▲──────┘              │ sidebar / router /
//!        │                   │ reload              │ secrets / host API
//!        ▼                   │                     ▼
//! ┌──────────────┐     ┌─────┴──────┐     ┌──────────────────┐
//! │  DevManager  │     │  packages  │     │     Registry     │──▶ UI
//! │ (HTTP watch) │     │  (external)│     │  (contributions) │
//! └──────────────┘     └────────────┘     └──────────────────┘
//! ```
//!
//! - **Registry**: process-wide store of nav items, routes, and disable
//!   callbacks, with synchronous change notifications.
//! - **Loader**: per-addon atomic enable/unload over unpacked packages.
//! - **Capability object**: per-addon record of mutators, scoped secrets,
//!   and the grouped Host API bridge.
//! - **DevManager**: serves addons from local HTTP origins and hot-reloads
//!   them on source changes.
//! - **AddonHost**: one-call orchestration, configuration, and logging.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use moneta_addons::prelude::*;
//!
//! let host = AddonHost::builder()
//!     .config(HostConfig::load()?)
//!     .commands(commands)       // flat record of backend command functions
//!     .secrets(secret_store)    // external keychain
//!     .store(package_store)     // installed addon packages
//!     .build()?;
//!
//! host.load_all().await;
//! let nav = host.registry().snapshot().nav_items;
//! ```

// Core types
pub use moneta_addon_core::*;

// Layer crates
pub use moneta_addon_dev;
pub use moneta_addon_host;
pub use moneta_addon_runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Orchestration - main entry point
    pub use moneta_addon_runtime::{AddonHost, HostConfig};

    // Contribution surface
    pub use moneta_addon_core::{
        ContributionRegistry, NavItem, RegistrySnapshot, RouteEntry, ScopedSecrets,
    };

    // Lifecycle
    pub use moneta_addon_host::{AddonLoader, CompatPolicy, LoadReport};

    // External collaborator contracts
    pub use moneta_addon_core::SecretStore;
    pub use moneta_addon_host::{HostCommands, PackageStore, QueryClient};

    // Dev workflow
    pub use moneta_addon_dev::{DevConfig, DevManager};
}
