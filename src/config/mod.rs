//! Configuration management

pub mod devices;

pub use devices::{DeviceConfig, DeviceStore, StoreError, DEVICES_FILE};

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::adapters::panasonic::{
    SessionSettings, DEFAULT_OFF_RETRY_BUDGET, DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_WAIT,
    DEFAULT_TIMEOUT,
};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub session: SessionConfig,

    /// Players seeded into the device store at startup
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_port() -> u16 {
    8090
}

/// Session timing as configured, in whole seconds
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_off_retry_budget")]
    pub off_retry_budget: u32,
    #[serde(default = "default_reconnect_wait_secs")]
    pub reconnect_wait_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_off_retry_budget() -> u32 {
    DEFAULT_OFF_RETRY_BUDGET
}

fn default_reconnect_wait_secs() -> u64 {
    DEFAULT_RECONNECT_WAIT.as_secs()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            off_retry_budget: default_off_retry_budget(),
            reconnect_wait_secs: default_reconnect_wait_secs(),
        }
    }
}

impl SessionConfig {
    /// Convert to session settings; zero values fall back to the defaults
    pub fn to_settings(&self) -> SessionSettings {
        let defaults = SessionSettings::default();
        SessionSettings {
            timeout: secs_or_default("timeout_secs", self.timeout_secs, defaults.timeout),
            poll_interval: secs_or_default(
                "poll_interval_secs",
                self.poll_interval_secs,
                defaults.poll_interval,
            ),
            off_retry_budget: if self.off_retry_budget == 0 {
                tracing::warn!(
                    "session.off_retry_budget must be positive, using {}",
                    defaults.off_retry_budget
                );
                defaults.off_retry_budget
            } else {
                self.off_retry_budget
            },
            reconnect_wait: secs_or_default(
                "reconnect_wait_secs",
                self.reconnect_wait_secs,
                defaults.reconnect_wait,
            ),
        }
    }
}

fn secs_or_default(name: &str, secs: u64, default: Duration) -> Duration {
    if secs == 0 {
        tracing::warn!("session.{} must be positive, using {:?}", name, default);
        default
    } else {
        Duration::from_secs(secs)
    }
}

/// Get config directory (PBC_CONFIG_DIR or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("PBC_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home)
                .join("Library/Application Support/panasonic-bluray-control");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("panasonic-bluray-control");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/panasonic-bluray-control");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("panasonic-bluray-control");
        }
    }

    std::path::PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // config.toml / config.json / config.yaml, whichever exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // PBC_PORT, PBC_SESSION__POLL_INTERVAL_SECS, ...
        .add_source(
            ::config::Environment::with_prefix("PBC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Explicit precedence: PBC_PORT > PORT > config > default
    if let Ok(port) = std::env::var("PBC_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
