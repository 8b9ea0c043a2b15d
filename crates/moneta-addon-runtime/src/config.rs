//! Addon host configuration.
//!
//! Layered extraction via figment: struct defaults, then an optional
//! `moneta-addons.toml` next to the executable, then `MONETA_ADDONS_*`
//! environment variables (nested keys split on `__`, e.g.
//! `MONETA_ADDONS_DEV__ENABLED=true`).

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use moneta_addon_dev::{DevConfig, DEFAULT_DEV_PORT_COUNT, DEFAULT_DEV_PORT_START};
use moneta_addon_host::{CompatPolicy, HOST_SDK_VERSION};

/// Config file name looked up in the working directory.
pub const CONFIG_FILE: &str = "moneta-addons.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MONETA_ADDONS_";

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Extraction or merge failure.
    #[error("configuration error: {0}")]
    Extract(#[from] figment::Error),
}

/// Top-level configuration of the addon host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// SDK version advertised to addons.
    pub sdk_version: String,
    /// How to treat manifests targeting another SDK version.
    pub compat_policy: CompatPolicy,
    /// Dev-mode section.
    pub dev: DevSection,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            sdk_version: HOST_SDK_VERSION.to_string(),
            compat_policy: CompatPolicy::default(),
            dev: DevSection::default(),
        }
    }
}

/// Dev-mode settings, in wire-friendly integral milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevSection {
    /// Whether the orchestrator activates the dev manager.
    pub enabled: bool,
    /// Ports probed during discovery.
    pub ports: Vec<u16>,
    /// Interval between `/status` polls.
    pub poll_interval_ms: u64,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// Whether source changes trigger automatic reloads.
    pub auto_reload: bool,
    /// Pause between teardown and reload.
    pub settle_delay_ms: u64,
}

impl Default for DevSection {
    fn default() -> Self {
        Self {
            enabled: false,
            ports: (DEFAULT_DEV_PORT_START..DEFAULT_DEV_PORT_START + DEFAULT_DEV_PORT_COUNT)
                .collect(),
            poll_interval_ms: 1000,
            request_timeout_ms: 2000,
            auto_reload: true,
            settle_delay_ms: 150,
        }
    }
}

impl DevSection {
    /// Converts the section into the dev manager's configuration.
    pub fn to_dev_config(&self) -> DevConfig {
        DevConfig {
            enabled: self.enabled,
            ports: self.ports.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            auto_reload: self.auto_reload,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}

impl HostConfig {
    /// Loads configuration from defaults, file, and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::default_figment())
    }

    /// The default provider stack.
    pub fn default_figment() -> Figment {
        Figment::from(Serialized::defaults(HostConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extracts a config from an arbitrary figment, for embedding hosts that
    /// bring their own providers.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.sdk_version, HOST_SDK_VERSION);
        assert!(!config.dev.enabled);
        assert_eq!(config.dev.ports.first(), Some(&DEFAULT_DEV_PORT_START));
        assert_eq!(config.dev.ports.len(), DEFAULT_DEV_PORT_COUNT as usize);
    }

    #[test]
    fn test_toml_overrides() {
        let figment = Figment::from(Serialized::defaults(HostConfig::default())).merge(
            Toml::string(
                r#"
                log_level = "debug"
                compat_policy = "strict"

                [dev]
                enabled = true
                ports = [4001, 4002]
                poll_interval_ms = 250
                "#,
            ),
        );
        let config = HostConfig::from_figment(figment).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.compat_policy, CompatPolicy::Strict);
        assert!(config.dev.enabled);
        assert_eq!(config.dev.ports, vec![4001, 4002]);

        let dev = config.dev.to_dev_config();
        assert_eq!(dev.poll_interval, Duration::from_millis(250));
        assert_eq!(dev.request_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("MONETA_ADDONS_DEV__ENABLED", "true");
            jail.set_env("MONETA_ADDONS_LOG_LEVEL", "trace");
            let config = HostConfig::from_figment(HostConfig::default_figment()).unwrap();
            assert!(config.dev.enabled);
            assert_eq!(config.log_level, "trace");
            Ok(())
        });
    }
}
