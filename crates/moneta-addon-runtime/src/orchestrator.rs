//! Top-level coordination of the addon subsystem.
//!
//! [`AddonHost`] is the one-call entry point the application uses to bring
//! addons up and down. It wires the registry, loader, and (in development
//! mode) the dev manager together, and exposes reload-all / unload-all /
//! debug-state operations.
//!
//! The subsystem is infallible at this level: [`load_all`](AddonHost::load_all)
//! always returns, whatever individual addons did. Failures surface as absent
//! contributions plus log lines, observable through
//! [`debug_state`](AddonHost::debug_state).

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use moneta_addon_core::{ContributionRegistry, RegistryStats, SecretStore};
use moneta_addon_dev::{DevError, DevManager, DevServer};
use moneta_addon_host::{
    AddonLoader, CapabilityFactory, HostCommands, LoadReport, LoadedAddonInfo, MemoryPackageStore,
    PackageStore,
};

use crate::config::HostConfig;

/// Aggregate view of the subsystem for diagnostics.
#[derive(Debug, Serialize)]
pub struct DebugState {
    /// Loaded addons with their sources.
    pub loaded: Vec<LoadedAddonInfo>,
    /// Discovered dev servers (empty when dev mode is off).
    pub dev_servers: Vec<DevServer>,
    /// Registry contribution counts.
    pub registry: RegistryStats,
}

/// The addon subsystem, fully wired.
pub struct AddonHost {
    config: HostConfig,
    registry: Arc<ContributionRegistry>,
    loader: Arc<AddonLoader>,
    dev: Option<Arc<DevManager>>,
}

impl AddonHost {
    /// Starts a builder.
    pub fn builder() -> AddonHostBuilder {
        AddonHostBuilder::default()
    }

    /// The shared contribution registry, for the UI layer to subscribe to.
    pub fn registry(&self) -> &Arc<ContributionRegistry> {
        &self.registry
    }

    /// The addon loader.
    pub fn loader(&self) -> &Arc<AddonLoader> {
        &self.loader
    }

    /// The active configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Brings the subsystem up: dev addons first when development mode is
    /// on (their ids then shadow installed copies), then installed addons.
    pub async fn load_all(&self) -> LoadReport {
        if let Some(dev) = &self.dev {
            info!("Development mode — loading dev addons before installed ones");
            dev.discover().await;
            dev.load_discovered().await;
            dev.start_watching();
            dev.start_push_channels().await;
        }
        let report = self.loader.load_installed().await;
        info!(%report, "Addon subsystem up");
        report
    }

    /// Unloads everything, then runs a fresh [`load_all`](Self::load_all).
    pub async fn reload_all(&self) -> LoadReport {
        self.unload_all();
        self.load_all().await
    }

    /// Unloads every addon and clears their contributions.
    pub fn unload_all(&self) {
        self.loader.unload_all();
    }

    /// Stops dev mode, if active, unloading dev-sourced addons.
    pub async fn stop_dev(&self) {
        if let Some(dev) = &self.dev {
            dev.stop().await;
        }
    }

    /// Snapshot of the subsystem for diagnostics.
    pub async fn debug_state(&self) -> DebugState {
        let dev_servers = match &self.dev {
            Some(dev) => dev.servers().await,
            None => Vec::new(),
        };
        DebugState {
            loaded: self.loader.debug_state(),
            dev_servers,
            registry: self.registry.stats(),
        }
    }
}

/// Builder wiring the external collaborators into an [`AddonHost`].
///
/// Collaborators not supplied default to in-memory implementations, which is
/// what tests and local tooling want; a real host supplies all three.
#[derive(Default)]
pub struct AddonHostBuilder {
    config: Option<HostConfig>,
    commands: Option<Arc<HostCommands>>,
    secrets: Option<Arc<dyn SecretStore>>,
    store: Option<Arc<dyn PackageStore>>,
}

impl AddonHostBuilder {
    /// Supplies the configuration; defaults to [`HostConfig::default`].
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Supplies the flat record of host command functions.
    pub fn commands(mut self, commands: Arc<HostCommands>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Supplies the external secret store.
    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Supplies the installed-package store.
    pub fn store(mut self, store: Arc<dyn PackageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wires everything together.
    ///
    /// Fails only when the dev manager's HTTP client cannot be built.
    pub fn build(self) -> Result<AddonHost, DevError> {
        let config = self.config.unwrap_or_default();
        let registry = Arc::new(ContributionRegistry::new());
        let commands = self
            .commands
            .unwrap_or_else(|| Arc::new(HostCommands::builder().build()));
        let secrets = self
            .secrets
            .unwrap_or_else(|| Arc::new(moneta_addon_core::MemorySecretStore::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryPackageStore::new()));

        let capabilities = CapabilityFactory::new(Arc::clone(&registry), commands, secrets);
        let loader = Arc::new(
            AddonLoader::new(Arc::clone(&registry), capabilities, store)
                .with_sdk_version(config.sdk_version.clone())
                .with_compat_policy(config.compat_policy),
        );

        let dev = if config.dev.enabled {
            Some(DevManager::new(
                config.dev.to_dev_config(),
                Arc::clone(&loader),
                Arc::clone(&registry),
            )?)
        } else {
            None
        };

        Ok(AddonHost {
            config,
            registry,
            loader,
            dev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevSection;
    use moneta_addon_core::{AddonBundle, AddonFile, AddonManifest};

    fn bundle(id: &str, source: &str) -> AddonBundle {
        AddonBundle {
            manifest: AddonManifest {
                id: id.to_string(),
                name: id.to_string(),
                version: "0.1.0".to_string(),
                main: "addon.rhai".to_string(),
                sdk_version: None,
                enabled: true,
                permissions: Vec::new(),
            },
            files: vec![AddonFile {
                name: "addon.rhai".to_string(),
                content: source.to_string(),
                is_main: true,
            }],
        }
    }

    fn store_with_tracker() -> Arc<MemoryPackageStore> {
        let store = Arc::new(MemoryPackageStore::new());
        store.insert(bundle(
            "tracker",
            r#"fn enable(ctx) { ctx.sidebar.add_item(#{ id: "t1", label: "Track" }); }"#,
        ));
        store
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_all_without_dev_mode() {
        let host = AddonHost::builder()
            .store(store_with_tracker())
            .build()
            .unwrap();

        let report = host.load_all().await;
        assert_eq!(report.loaded, vec!["tracker"]);

        let state = host.debug_state().await;
        assert_eq!(state.loaded.len(), 1);
        assert!(state.dev_servers.is_empty());
        assert_eq!(state.registry.nav_items, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reload_all_is_idempotent() {
        let host = AddonHost::builder()
            .store(store_with_tracker())
            .build()
            .unwrap();

        let first = host.load_all().await;
        let second = host.reload_all().await;
        assert_eq!(first.loaded, second.loaded);
        assert_eq!(host.debug_state().await.registry.nav_items, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unload_all_clears_registry() {
        let host = AddonHost::builder()
            .store(store_with_tracker())
            .build()
            .unwrap();
        host.load_all().await;
        host.unload_all();

        let state = host.debug_state().await;
        assert!(state.loaded.is_empty());
        assert_eq!(state.registry.nav_items, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dev_mode_with_no_servers_still_loads_installed() {
        let config = HostConfig {
            dev: DevSection {
                enabled: true,
                ports: Vec::new(),
                ..DevSection::default()
            },
            ..HostConfig::default()
        };
        let host = AddonHost::builder()
            .config(config)
            .store(store_with_tracker())
            .build()
            .unwrap();

        let report = host.load_all().await;
        assert_eq!(report.loaded, vec!["tracker"]);
        host.stop_dev().await;
    }
}
