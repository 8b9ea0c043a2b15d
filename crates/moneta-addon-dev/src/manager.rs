//! Dev-server discovery, polling, and hot reload.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::future;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use moneta_addon_core::{AddonBundle, AddonFile, AddonManifest, ContributionRegistry};
use moneta_addon_host::{AddonLoader, AddonSource};

use crate::{DevConfig, DevError, DevServer, DevServerStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "addonId")]
    addon_id: String,
}

/// Watches developer HTTP servers and hot-reloads their addons.
///
/// The manager owns the dev-server table; the loader owns the loaded-addon
/// table. Neither reaches into the other's state — reloads go through the
/// loader's public unload/load operations.
pub struct DevManager {
    config: DevConfig,
    /// Short-timeout client for probes and fetches.
    http: reqwest::Client,
    /// Connect-timeout-only client: the push channel holds its response
    /// body open indefinitely.
    push_http: reqwest::Client,
    loader: Arc<AddonLoader>,
    registry: Arc<ContributionRegistry>,
    servers: RwLock<HashMap<String, DevServer>>,
    /// Addon ids with a reload in flight; concurrent triggers are dropped.
    reloading: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    watcher_started: AtomicBool,
    push_started: AtomicBool,
}

impl DevManager {
    /// Creates a manager over the shared loader and registry.
    pub fn new(
        config: DevConfig,
        loader: Arc<AddonLoader>,
        registry: Arc<ContributionRegistry>,
    ) -> Result<Arc<Self>, DevError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DevError::Http(e.to_string()))?;
        let push_http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| DevError::Http(e.to_string()))?;
        Ok(Arc::new(Self {
            config,
            http,
            push_http,
            loader,
            registry,
            servers: RwLock::new(HashMap::new()),
            reloading: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
            watcher_started: AtomicBool::new(false),
            push_started: AtomicBool::new(false),
        }))
    }

    // ─── Discovery ───────────────────────────────────────────────────────────

    /// Probes every configured port and registers responding servers.
    ///
    /// Returns the addon ids discovered in this pass. Ports are probed
    /// concurrently so one slow port cannot block the rest.
    pub async fn discover(&self) -> Vec<String> {
        let probes = self.config.ports.iter().map(|&port| self.probe_port(port));
        let found: Vec<DevServer> = future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut ids = Vec::new();
        let mut servers = self.servers.write().await;
        for server in found {
            info!(
                addon = %server.addon_id,
                port = server.port,
                "Discovered dev server"
            );
            ids.push(server.addon_id.clone());
            servers.insert(server.addon_id.clone(), server);
        }
        ids
    }

    async fn probe_port(&self, port: u16) -> Option<DevServer> {
        let base_url = format!("http://127.0.0.1:{port}");
        let health = self
            .http
            .get(format!("{base_url}/health"))
            .send()
            .await
            .ok()?;
        if !health.status().is_success() {
            return None;
        }
        let manifest: AddonManifest = self
            .http
            .get(format!("{base_url}/manifest.json"))
            .send()
            .await
            .ok()?
            .json()
            .await
            .map_err(|e| {
                warn!(port, error = %e, "Dev server health passed but manifest is invalid");
                e
            })
            .ok()?;
        Some(DevServer {
            addon_id: manifest.id,
            name: manifest.name,
            base_url,
            port,
            status: DevServerStatus::Running,
            last_modified: None,
        })
    }

    /// Clears the server table and re-probes every port, recovering servers
    /// previously marked `error`.
    pub async fn refresh(&self) -> Vec<String> {
        self.servers.write().await.clear();
        self.discover().await
    }

    /// Copy of the current dev-server table.
    pub async fn servers(&self) -> Vec<DevServer> {
        let mut servers: Vec<DevServer> = self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.addon_id.cmp(&b.addon_id));
        servers
    }

    // ─── Loading ─────────────────────────────────────────────────────────────

    /// Loads every discovered running addon. Per-addon failures are logged
    /// and isolated. Returns the ids that loaded.
    pub async fn load_discovered(&self) -> Vec<String> {
        let ids: Vec<String> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .filter(|s| s.status == DevServerStatus::Running)
                .map(|s| s.addon_id.clone())
                .collect()
        };

        let mut loaded = Vec::new();
        for id in ids {
            match self.load_addon(&id).await {
                Ok(()) => loaded.push(id),
                Err(e) => error!(addon = %id, error = %e, "Dev addon failed to load"),
            }
        }
        loaded
    }

    /// Fetches one addon's source and manifest from its dev server and
    /// enables it through the loader.
    pub async fn load_addon(&self, id: &str) -> Result<(), DevError> {
        let base_url = {
            let servers = self.servers.read().await;
            let server = servers
                .get(id)
                .ok_or_else(|| DevError::UnknownAddon { id: id.to_string() })?;
            server.base_url.clone()
        };

        match self.fetch_bundle(&base_url).await {
            Ok(bundle) => {
                let port = bundle_port(&base_url);
                self.loader.load_bundle(
                    bundle,
                    AddonSource::Dev {
                        origin: base_url,
                        port,
                    },
                )?;
                Ok(())
            }
            Err(e) => {
                self.mark_error(id).await;
                Err(e)
            }
        }
    }

    async fn fetch_bundle(&self, base_url: &str) -> Result<AddonBundle, DevError> {
        // Reconfirm liveness before the heavier fetches.
        self.get_ok(&format!("{base_url}/health")).await?;

        let manifest_url = format!("{base_url}/manifest.json");
        let manifest: AddonManifest = self
            .get_ok(&manifest_url)
            .await?
            .json()
            .await
            .map_err(|e| DevError::InvalidPayload {
                url: manifest_url,
                reason: e.to_string(),
            })?;

        let source_url = format!("{base_url}/addon.js");
        let source = self
            .get_ok(&source_url)
            .await?
            .text()
            .await
            .map_err(|e| DevError::InvalidPayload {
                url: source_url,
                reason: e.to_string(),
            })?;

        let main = manifest.main.clone();
        Ok(AddonBundle {
            manifest,
            files: vec![AddonFile {
                name: main,
                content: source,
                is_main: true,
            }],
        })
    }

    async fn get_ok(&self, url: &str) -> Result<reqwest::Response, DevError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DevError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        response
            .error_for_status()
            .map_err(|e| DevError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    // ─── Watching ────────────────────────────────────────────────────────────

    /// Spawns the `/status` polling task. Safe to call more than once; only
    /// the first call starts a watcher.
    pub fn start_watching(self: &Arc<Self>) {
        if !self.config.auto_reload {
            debug!("Auto-reload disabled — dev watcher not started");
            return;
        }
        if self.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                manager.poll_once().await;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// One polling pass over every running server.
    pub async fn poll_once(self: &Arc<Self>) {
        let running: Vec<(String, String, Option<DateTime<Utc>>)> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .filter(|s| s.status == DevServerStatus::Running)
                .map(|s| (s.addon_id.clone(), s.base_url.clone(), s.last_modified))
                .collect()
        };

        for (id, base_url, previous) in running {
            let status_url = format!("{base_url}/status");
            let payload = match self.get_ok(&status_url).await {
                Ok(response) => match response.json::<StatusPayload>().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(addon = %id, error = %e, "Dev server status payload invalid");
                        self.mark_error(&id).await;
                        continue;
                    }
                },
                Err(e) => {
                    warn!(addon = %id, error = %e, "Dev server unreachable — marking error");
                    self.mark_error(&id).await;
                    continue;
                }
            };

            if let Some(server) = self.servers.write().await.get_mut(&id) {
                server.last_modified = Some(payload.last_modified);
            }
            if let Some(previous) = previous
                && payload.last_modified > previous
            {
                info!(addon = %id, modified = %payload.last_modified, "Source change detected");
                self.trigger_reload(&id).await;
            }
        }
    }

    // ─── Reloading ───────────────────────────────────────────────────────────

    /// Reloads one addon, serialising per id: a trigger arriving while a
    /// reload is in flight is dropped.
    pub async fn trigger_reload(self: &Arc<Self>, id: &str) {
        if !self.reloading.lock().insert(id.to_string()) {
            debug!(addon = %id, "Reload already in flight — dropping trigger");
            return;
        }
        let result = self.reload_inner(id).await;
        self.reloading.lock().remove(id);
        if let Err(e) = result {
            // The old instance stays torn down; the addon is absent until
            // the next source change.
            error!(addon = %id, error = %e, "Dev reload failed");
        }
    }

    async fn reload_inner(&self, id: &str) -> Result<(), DevError> {
        self.loader.unload(id);
        // Let teardown observers fire before the replacement registers.
        tokio::time::sleep(self.config.settle_delay).await;
        self.load_addon(id).await?;
        self.registry.publish();
        info!(addon = %id, "Dev addon reloaded");
        Ok(())
    }

    // ─── Push channel ────────────────────────────────────────────────────────

    /// Subscribes to each running server's `/addon-updates` stream as a push
    /// alternative to polling. Silent failure is fine — polling remains the
    /// fallback. Only the first call subscribes.
    pub async fn start_push_channels(self: &Arc<Self>) {
        if self.push_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let targets: Vec<String> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .filter(|s| s.status == DevServerStatus::Running)
                .map(|s| s.base_url.clone())
                .collect()
        };
        for base_url in targets {
            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                manager.push_loop(base_url).await;
            });
            self.tasks.lock().push(handle);
        }
    }

    async fn push_loop(self: Arc<Self>, base_url: String) {
        let url = format!("{base_url}/addon-updates");
        let response = match self.push_http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            _ => {
                debug!(url = %url, "Push channel unavailable — relying on polling");
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let Ok(chunk) = chunk else { break };
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                match serde_json::from_str::<PushMessage>(data.trim()) {
                    Ok(message) if message.kind == "addon-changed" => {
                        info!(addon = %message.addon_id, "Push notification — reloading");
                        self.trigger_reload(&message.addon_id).await;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Ignoring malformed push message"),
                }
            }
        }
        debug!(url = %url, "Push channel closed");
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Stops watching, unloads every dev-sourced addon, and forgets the
    /// server table.
    pub async fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.watcher_started.store(false, Ordering::SeqCst);
        self.push_started.store(false, Ordering::SeqCst);
        for id in self.loader.dev_loaded_ids() {
            self.loader.unload(&id);
        }
        self.servers.write().await.clear();
        info!("Dev manager stopped");
    }

    async fn mark_error(&self, id: &str) {
        if let Some(server) = self.servers.write().await.get_mut(id) {
            server.status = DevServerStatus::Error;
        }
    }
}

fn bundle_port(base_url: &str) -> u16 {
    base_url
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}
