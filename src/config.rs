//! Bridge configuration loaded from the user's config directory.
//!
//! Missing or corrupted configuration degrades to defaults instead of
//! preventing startup; a default file is written on first run.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::driver::read_loop::RetryPolicy;

const CONFIG_DIR: &str = "openpad";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No user configuration directory available")]
    NoConfigDir,

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Identity and transfer parameters of the controller to bind.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB vendor id of the controller.
    pub vendor_id: u16,

    /// USB product id of the controller.
    pub product_id: u16,

    /// Interface number carrying the interrupt endpoint pair.
    pub interface: u8,

    /// Timeout of one blocking transfer attempt before the abort token is
    /// re-checked.
    pub transfer_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        // Wired Xbox 360 controller.
        Self {
            vendor_id: 0x045e,
            product_id: 0x028e,
            interface: 0,
            transfer_timeout_ms: 200,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity of the HID report channel towards the sink.
    pub report_channel_capacity: usize,

    pub device: DeviceConfig,
    pub retry: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            report_channel_capacity: 64,
            device: DeviceConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Writes a default configuration file if none exists yet.
    pub fn ensure_default_config() -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(&Self::default())?)?;
        info!(path = %path.display(), "Wrote default configuration");
        Ok(())
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Loads the configuration, falling back to defaults on any error.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(err) => {
                warn!(%err, "Falling back to default configuration");
                Self::default()
            }
        }
    }
}
