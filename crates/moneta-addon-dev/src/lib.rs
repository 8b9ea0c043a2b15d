//! Dev-server support: serve addons from a developer's HTTP origin and hot
//! reload them on source changes, without restarting the host.
//!
//! Each live addon exposes a tiny HTTP contract:
//!
//! | Endpoint | Response |
//! |----------|----------|
//! | `GET /health` | 2xx when alive |
//! | `GET /manifest.json` | same shape as the on-disk manifest |
//! | `GET /addon.js` | source text of the main module |
//! | `GET /status` | `{ "lastModified": <RFC3339> }` |
//! | `GET /addon-updates` | optional server-sent events push channel |
//!
//! The [`DevManager`] probes a small port range for such servers, loads what
//! it finds through the regular [`AddonLoader`](moneta_addon_host::AddonLoader),
//! and polls `/status` to reload just the changed addon. A dev server going
//! away marks its entry `error` and never crashes the host.

mod manager;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use moneta_addon_core::LoadError;

pub use manager::DevManager;

/// First port probed for dev servers.
pub const DEFAULT_DEV_PORT_START: u16 = 3001;

/// Number of consecutive ports probed by default.
pub const DEFAULT_DEV_PORT_COUNT: u16 = 8;

/// Configuration for the dev manager.
#[derive(Debug, Clone)]
pub struct DevConfig {
    /// Master switch; the orchestrator only constructs the manager when the
    /// host runs in development mode.
    pub enabled: bool,
    /// Ports probed during discovery.
    pub ports: Vec<u16>,
    /// Interval between `/status` polls.
    pub poll_interval: Duration,
    /// Per-request timeout; a timed-out probe means "no dev server here".
    pub request_timeout: Duration,
    /// Whether the `/status` watcher runs at all.
    pub auto_reload: bool,
    /// Pause between tearing down the old instance and loading the new one,
    /// so teardown observers fire before the replacement registers.
    pub settle_delay: Duration,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ports: (DEFAULT_DEV_PORT_START..DEFAULT_DEV_PORT_START + DEFAULT_DEV_PORT_COUNT)
                .collect(),
            poll_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(2000),
            auto_reload: true,
            settle_delay: Duration::from_millis(150),
        }
    }
}

/// Reachability of a discovered dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevServerStatus {
    /// Responding; participates in polling.
    Running,
    /// Shut down deliberately.
    Stopped,
    /// Unreachable; skipped until a refresh re-probes it.
    Error,
}

/// One discovered dev server, keyed by the addon id from its manifest.
#[derive(Debug, Clone, Serialize)]
pub struct DevServer {
    /// Addon id from `/manifest.json`.
    pub addon_id: String,
    /// Display name from the manifest.
    pub name: String,
    /// Origin the addon is served from.
    pub base_url: String,
    /// Discovered port.
    pub port: u16,
    /// Current reachability.
    pub status: DevServerStatus,
    /// Newest `/status` timestamp observed so far.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Errors from dev-server interaction.
#[derive(Debug, Error)]
pub enum DevError {
    /// HTTP client construction failed.
    #[error("http client: {0}")]
    Http(String),

    /// A probe or fetch failed or timed out.
    #[error("dev server {url} unreachable: {reason}")]
    Unreachable {
        /// URL that failed.
        url: String,
        /// Transport-level reason.
        reason: String,
    },

    /// The server answered with something that is not a manifest or status
    /// payload.
    #[error("dev server {url} returned an invalid payload: {reason}")]
    InvalidPayload {
        /// URL that failed.
        url: String,
        /// Parse failure.
        reason: String,
    },

    /// No discovered server is registered under the addon id.
    #[error("no dev server registered for addon '{id}'")]
    UnknownAddon {
        /// The unknown addon id.
        id: String,
    },

    /// Loading the fetched source failed.
    #[error(transparent)]
    Load(#[from] LoadError),
}
