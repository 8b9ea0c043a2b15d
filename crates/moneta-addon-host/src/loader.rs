//! Addon lifecycle: discover, validate, enable, unload.
//!
//! [`AddonLoader`] owns the table of loaded addons and the per-session id
//! set. Loading is atomic per addon: the id is reserved before any work, the
//! capability object is built fresh, and on any failure the registry is torn
//! down for that id so a broken addon leaves no partial contributions and
//! never blocks its siblings.
//!
//! # State machine
//!
//! ```text
//! load_bundle() ──► reserved ──► enabled (LoadedAddon recorded)
//!                      │
//!                      └──► failed (teardown, reservation released)
//! unload() ──► disable handle ──► disable callbacks ──► contributions removed
//! ```
//!
//! Per-addon failures are logged outcomes collected in a [`LoadReport`];
//! no error escapes a batch operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use rhai::FnPtr;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use moneta_addon_core::{AddonBundle, ContributionRegistry, LoadError};

use crate::capability::{build_engine, CapabilityFactory};
use crate::script::{extract_disable, ScriptModule};
use crate::store::PackageStore;

/// SDK version this host provides to addons.
pub const HOST_SDK_VERSION: &str = "1.0.0";

/// How to treat a manifest whose `sdkVersion` differs from the host's.
///
/// The default is lenient — log a warning and proceed — matching the
/// behaviour addons in the wild were written against. Strict refusal is the
/// knob to turn once the SDK starts evolving incompatibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatPolicy {
    /// Warn and load anyway.
    #[default]
    Lenient,
    /// Refuse the addon with [`LoadError::IncompatibleSdk`].
    Strict,
}

/// Where a loaded addon's source came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AddonSource {
    /// Installed package from the persistent store.
    Installed,
    /// Live source served by a developer's HTTP server.
    Dev {
        /// Base URL of the dev server.
        origin: String,
        /// TCP port the server was discovered on.
        port: u16,
    },
}

/// One successfully enabled addon.
pub struct LoadedAddon {
    /// The addon's id.
    pub id: String,
    /// Where the source came from.
    pub source: AddonSource,
    /// When the current instance was enabled.
    pub last_loaded_at: SystemTime,
    script: ScriptModule,
    disable: Option<FnPtr>,
}

impl LoadedAddon {
    fn run_disable(&self) {
        if let Some(disable) = &self.disable
            && let Err(e) = self.script.call_fn_ptr(disable)
        {
            error!(addon = %self.id, error = %e, "Disable handle failed");
        }
    }
}

/// Serializable view of one loaded addon, for the debug surface.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedAddonInfo {
    /// The addon's id.
    pub id: String,
    /// Where the source came from.
    pub source: AddonSource,
    /// When the current instance was enabled.
    pub last_loaded_at: SystemTime,
}

/// Outcome of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ids enabled by this batch.
    pub loaded: Vec<String>,
    /// Ids skipped (disabled in the manifest, or already loaded).
    pub skipped: Vec<String>,
    /// Ids that failed, with the per-addon error.
    pub failed: Vec<(String, LoadError)>,
}

impl std::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} loaded, {} skipped, {} failed",
            self.loaded.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

// ─── AddonLoader ──────────────────────────────────────────────────────────────

/// Discovers, validates, enables, and unloads addons.
pub struct AddonLoader {
    registry: Arc<ContributionRegistry>,
    capabilities: CapabilityFactory,
    store: Arc<dyn PackageStore>,
    sdk_version: String,
    compat: CompatPolicy,
    /// Ids reserved for this session: everything loaded plus loads in
    /// flight. Reserving before any awaitable work both guards duplicates
    /// and gives dev-served addons precedence over their installed copies.
    session_ids: Mutex<HashSet<String>>,
    loaded: Mutex<HashMap<String, LoadedAddon>>,
}

impl AddonLoader {
    /// Creates a loader over the shared registry, capability factory, and
    /// package store.
    pub fn new(
        registry: Arc<ContributionRegistry>,
        capabilities: CapabilityFactory,
        store: Arc<dyn PackageStore>,
    ) -> Self {
        Self {
            registry,
            capabilities,
            store,
            sdk_version: HOST_SDK_VERSION.to_string(),
            compat: CompatPolicy::default(),
            session_ids: Mutex::new(HashSet::new()),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the SDK version advertised to addons.
    pub fn with_sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = version.into();
        self
    }

    /// Sets the SDK compatibility policy.
    pub fn with_compat_policy(mut self, policy: CompatPolicy) -> Self {
        self.compat = policy;
        self
    }

    // ─── Loading ─────────────────────────────────────────────────────────────

    /// Loads every enabled installed addon.
    ///
    /// Store failures are logged and yield an empty report; per-addon
    /// failures are isolated and recorded. Always returns.
    pub async fn load_installed(&self) -> LoadReport {
        let bundles = match self.store.list_installed().await {
            Ok(bundles) => bundles,
            Err(e) => {
                error!(error = %e, "Failed to enumerate installed addons");
                return LoadReport::default();
            }
        };

        let mut report = LoadReport::default();
        for bundle in bundles {
            let id = bundle.manifest.id.clone();
            if !bundle.manifest.enabled {
                debug!(addon = %id, "Addon disabled in manifest — skipping");
                report.skipped.push(id);
                continue;
            }
            match self.load_bundle(bundle, AddonSource::Installed) {
                Ok(()) => report.loaded.push(id),
                Err(LoadError::DuplicateLoad { .. }) => report.skipped.push(id),
                Err(e) => {
                    error!(addon = %id, error = %e, "Addon failed to load");
                    report.failed.push((id, e));
                }
            }
        }
        info!(%report, "Installed addon load finished");
        report
    }

    /// Loads one unpacked bundle, atomically with respect to that addon.
    ///
    /// A failure tears down whatever the partial load registered and
    /// releases the session reservation; the registry ends up exactly as it
    /// was before the call.
    pub fn load_bundle(&self, bundle: AddonBundle, source: AddonSource) -> Result<(), LoadError> {
        let id = bundle.manifest.id.clone();

        if !self.session_ids.lock().insert(id.clone()) {
            warn!(addon = %id, "Addon already loaded this session — skipping duplicate");
            return Err(LoadError::DuplicateLoad { id });
        }

        match self.enable(&bundle, source) {
            Ok(addon) => {
                info!(addon = %id, "Addon enabled");
                self.loaded.lock().insert(id, addon);
                Ok(())
            }
            Err(e) => {
                // Remove anything the partial load managed to register.
                self.registry.teardown_addon(&id);
                self.session_ids.lock().remove(&id);
                Err(e)
            }
        }
    }

    fn enable(&self, bundle: &AddonBundle, source: AddonSource) -> Result<LoadedAddon, LoadError> {
        let manifest = &bundle.manifest;
        let id = manifest.id.clone();

        if let Some(declared) = &manifest.sdk_version
            && declared != &self.sdk_version
        {
            match self.compat {
                CompatPolicy::Lenient => warn!(
                    addon = %id,
                    declared = %declared,
                    host = %self.sdk_version,
                    "SDK version mismatch — loading anyway"
                ),
                CompatPolicy::Strict => {
                    return Err(LoadError::IncompatibleSdk {
                        id,
                        declared: declared.clone(),
                        host: self.sdk_version.clone(),
                    });
                }
            }
        }

        let main = bundle
            .main_file()
            .ok_or_else(|| LoadError::MissingMainFile { id: id.clone() })?;

        let (module, tail) =
            ScriptModule::evaluate(build_engine(), &main.content).map_err(|e| {
                LoadError::Script {
                    id: id.clone(),
                    reason: e.to_string(),
                }
            })?;

        let entry = module
            .resolve_entry(&tail)
            .ok_or_else(|| LoadError::EntryResolution { id: id.clone() })?;

        let capability = self.capabilities.create(&id, module.clone());
        let returned = module
            .invoke_entry(&entry, capability)
            .map_err(|e| LoadError::Enable {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        Ok(LoadedAddon {
            id,
            source,
            last_loaded_at: SystemTime::now(),
            disable: extract_disable(&returned),
            script: module,
        })
    }

    // ─── Unloading ───────────────────────────────────────────────────────────

    /// Unloads one addon: disable handle, disable callbacks, contribution
    /// removal. Returns `false` when the id is not loaded.
    pub fn unload(&self, id: &str) -> bool {
        let Some(addon) = self.loaded.lock().remove(id) else {
            warn!(addon = %id, "Unload requested for an addon that is not loaded");
            return false;
        };
        self.session_ids.lock().remove(id);
        addon.run_disable();
        self.registry.teardown_addon(id);
        info!(addon = %id, "Addon unloaded");
        true
    }

    /// Unloads every addon, isolating per-addon disable failures, then
    /// sweeps the registry in one notification.
    pub fn unload_all(&self) {
        let drained: Vec<LoadedAddon> = {
            let mut loaded = self.loaded.lock();
            loaded.drain().map(|(_, addon)| addon).collect()
        };
        {
            let mut ids = self.session_ids.lock();
            for addon in &drained {
                ids.remove(&addon.id);
            }
        }
        for addon in &drained {
            addon.run_disable();
        }
        self.registry.teardown_all();
        info!(count = drained.len(), "All addons unloaded");
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// Ids of currently loaded addons.
    pub fn loaded_ids(&self) -> Vec<String> {
        self.loaded.lock().keys().cloned().collect()
    }

    /// Whether `id` is loaded.
    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.lock().contains_key(id)
    }

    /// Ids of addons loaded from a dev server.
    pub fn dev_loaded_ids(&self) -> Vec<String> {
        self.loaded
            .lock()
            .values()
            .filter(|a| matches!(a.source, AddonSource::Dev { .. }))
            .map(|a| a.id.clone())
            .collect()
    }

    /// Serializable view of the loaded table.
    pub fn debug_state(&self) -> Vec<LoadedAddonInfo> {
        let mut state: Vec<LoadedAddonInfo> = self
            .loaded
            .lock()
            .values()
            .map(|a| LoadedAddonInfo {
                id: a.id.clone(),
                source: a.source.clone(),
                last_loaded_at: a.last_loaded_at,
            })
            .collect();
        state.sort_by(|a, b| a.id.cmp(&b.id));
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostCommands;
    use crate::store::MemoryPackageStore;
    use moneta_addon_core::{AddonFile, AddonManifest, MemorySecretStore, SecretStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        registry: Arc<ContributionRegistry>,
        secrets: Arc<MemorySecretStore>,
        store: Arc<MemoryPackageStore>,
        loader: AddonLoader,
    }

    fn fixture() -> Fixture {
        fixture_with(CompatPolicy::Lenient)
    }

    fn fixture_with(policy: CompatPolicy) -> Fixture {
        let registry = Arc::new(ContributionRegistry::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let store = Arc::new(MemoryPackageStore::new());
        let capabilities = CapabilityFactory::new(
            Arc::clone(&registry),
            Arc::new(HostCommands::builder().build()),
            secrets.clone() as Arc<dyn SecretStore>,
        );
        let loader = AddonLoader::new(
            Arc::clone(&registry),
            capabilities,
            store.clone() as Arc<dyn PackageStore>,
        )
        .with_compat_policy(policy);
        Fixture {
            registry,
            secrets,
            store,
            loader,
        }
    }

    fn bundle(id: &str, enabled: bool, source: &str) -> AddonBundle {
        AddonBundle {
            manifest: AddonManifest {
                id: id.to_string(),
                name: id.to_string(),
                version: "0.1.0".to_string(),
                main: "addon.rhai".to_string(),
                sdk_version: None,
                enabled,
                permissions: Vec::new(),
            },
            files: vec![AddonFile {
                name: "addon.rhai".to_string(),
                content: source.to_string(),
                is_main: true,
            }],
        }
    }

    const TRACKER: &str = r#"
        fn enable(ctx) {
            ctx.sidebar.add_item(#{ id: "t1", label: "Track", order: 10 });
            ctx.router.add(#{ path: "/track", component: "tracker-page" });
            ctx.on_disable(|| ctx.secrets.set("disabled", "yes"));
            #{ disable: || ctx.secrets.set("handle", "ran") }
        }
    "#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_basic_load_filters_disabled() {
        let f = fixture();
        f.store.insert(bundle("tracker", true, TRACKER));
        f.store
            .insert(bundle("notes", false, "fn enable(ctx) { }"));

        let report = f.loader.load_installed().await;
        assert_eq!(report.loaded, vec!["tracker"]);
        assert_eq!(report.skipped, vec!["notes"]);
        assert_eq!(f.loader.loaded_ids(), vec!["tracker"]);
        assert!(f.registry.snapshot().nav_item("t1").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unload_tears_down_everything() {
        let f = fixture();
        f.loader
            .load_bundle(bundle("tracker", true, TRACKER), AddonSource::Installed)
            .unwrap();
        assert!(f.registry.snapshot().route("/track").is_some());

        assert!(f.loader.unload("tracker"));
        let snapshot = f.registry.snapshot();
        assert!(snapshot.nav_item("t1").is_none());
        assert!(snapshot.route("/track").is_none());
        // Both the disable handle and the registered callback ran.
        assert_eq!(
            f.secrets.get("addon_tracker_handle").unwrap().as_deref(),
            Some("ran")
        );
        assert_eq!(
            f.secrets.get("addon_tracker_disabled").unwrap().as_deref(),
            Some("yes")
        );
        assert!(!f.loader.is_loaded("tracker"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_secret_isolation_between_addons() {
        let f = fixture();
        let script = r#"fn enable(ctx) { ctx.secrets.set("token", ctx.id); }"#;
        f.loader
            .load_bundle(bundle("a", true, script), AddonSource::Installed)
            .unwrap();
        f.loader
            .load_bundle(bundle("b", true, script), AddonSource::Installed)
            .unwrap();

        assert_eq!(f.secrets.get("addon_a_token").unwrap().as_deref(), Some("a"));
        assert_eq!(f.secrets.get("addon_b_token").unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_enable_leaves_no_residue() {
        let f = fixture();
        f.store.insert(bundle(
            "broken",
            true,
            r#"
            fn enable(ctx) {
                ctx.sidebar.add_item(#{ id: "b1", label: "Broken" });
                throw "enable exploded";
            }
            "#,
        ));
        f.store.insert(bundle("tracker", true, TRACKER));

        let report = f.loader.load_installed().await;
        assert_eq!(report.loaded, vec!["tracker"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, LoadError::Enable { .. }));

        let snapshot = f.registry.snapshot();
        assert!(snapshot.nav_item("b1").is_none());
        assert!(snapshot.nav_item("t1").is_some());
        assert!(!f.loader.is_loaded("broken"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_load_is_skipped_and_harmless() {
        let f = fixture();
        f.loader
            .load_bundle(bundle("tracker", true, TRACKER), AddonSource::Installed)
            .unwrap();
        let before = f.registry.snapshot();

        let err = f
            .loader
            .load_bundle(bundle("tracker", true, TRACKER), AddonSource::Installed)
            .unwrap_err();
        assert!(matches!(err, LoadError::DuplicateLoad { .. }));

        let after = f.registry.snapshot();
        assert_eq!(before.nav_items.len(), after.nav_items.len());
        assert_eq!(before.routes.len(), after.routes.len());
        assert!(f.loader.is_loaded("tracker"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_main_file() {
        let f = fixture();
        let mut broken = bundle("nomain", true, "");
        broken.files[0].is_main = false;
        let err = f
            .loader
            .load_bundle(broken, AddonSource::Installed)
            .unwrap_err();
        assert!(matches!(err, LoadError::MissingMainFile { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entry_resolution_failure() {
        let f = fixture();
        let err = f
            .loader
            .load_bundle(bundle("inert", true, "let x = 1;"), AddonSource::Installed)
            .unwrap_err();
        assert!(matches!(err, LoadError::EntryResolution { .. }));
        assert!(!f.loader.is_loaded("inert"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sdk_mismatch_lenient_loads_strict_refuses() {
        let mut with_sdk = bundle("old", true, TRACKER);
        with_sdk.manifest.sdk_version = Some("0.9.0".to_string());

        let lenient = fixture();
        lenient
            .loader
            .load_bundle(with_sdk.clone(), AddonSource::Installed)
            .unwrap();
        assert!(lenient.loader.is_loaded("old"));

        let strict = fixture_with(CompatPolicy::Strict);
        let err = strict
            .loader
            .load_bundle(with_sdk, AddonSource::Installed)
            .unwrap_err();
        assert!(matches!(err, LoadError::IncompatibleSdk { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unload_all_notifies_once_and_reload_is_idempotent() {
        let f = fixture();
        f.store.insert(bundle("tracker", true, TRACKER));
        f.store.insert(bundle(
            "notes",
            true,
            r#"fn enable(ctx) { ctx.sidebar.add_item(#{ id: "n1", label: "Notes" }); }"#,
        ));
        let first = f.loader.load_installed().await;
        let mut first_ids = first.loaded.clone();
        first_ids.sort();

        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let _sub = f.registry.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        f.loader.unload_all();
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        assert!(f.loader.loaded_ids().is_empty());
        assert_eq!(f.registry.stats().nav_items, 0);

        let second = f.loader.load_installed().await;
        let mut second_ids = second.loaded.clone();
        second_ids.sort();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discovery_failure_yields_empty_report() {
        struct FailingStore;
        #[async_trait::async_trait]
        impl PackageStore for FailingStore {
            async fn list_installed(
                &self,
            ) -> Result<Vec<AddonBundle>, crate::store::StoreError> {
                Err(crate::store::StoreError::Unavailable("db gone".into()))
            }
        }

        let registry = Arc::new(ContributionRegistry::new());
        let capabilities = CapabilityFactory::new(
            Arc::clone(&registry),
            Arc::new(HostCommands::builder().build()),
            Arc::new(MemorySecretStore::new()),
        );
        let loader = AddonLoader::new(registry, capabilities, Arc::new(FailingStore));

        let report = loader.load_installed().await;
        assert!(report.loaded.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debug_state_reports_sources() {
        let f = fixture();
        f.loader
            .load_bundle(
                bundle("live", true, TRACKER),
                AddonSource::Dev {
                    origin: "http://127.0.0.1:3001".to_string(),
                    port: 3001,
                },
            )
            .unwrap();

        let state = f.loader.debug_state();
        assert_eq!(state.len(), 1);
        assert!(matches!(state[0].source, AddonSource::Dev { port: 3001, .. }));
        assert_eq!(f.loader.dev_loaded_ids(), vec!["live"]);
    }
}
