//! Runtime layer of the Moneta addon host: configuration, logging, and the
//! [`AddonHost`] orchestrator that brings the subsystem up and down.

pub mod config;
pub mod logging;
pub mod orchestrator;

pub use config::{ConfigError, DevSection, HostConfig, CONFIG_FILE, ENV_PREFIX};
pub use orchestrator::{AddonHost, AddonHostBuilder, DebugState};
