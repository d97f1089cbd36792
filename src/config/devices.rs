//! Configured players and their JSON persistence

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::get_config_dir;

/// File name of the persisted device list inside the config directory
pub const DEVICES_FILE: &str = "devices.json";

/// Configuration of one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    /// `host` or `host:port`
    pub address: String,
    /// Keep polling even when the player stays off
    #[serde(default)]
    pub always_on: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid device store file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Device list backed by a JSON file
#[derive(Debug)]
pub struct DeviceStore {
    path: PathBuf,
    devices: Vec<DeviceConfig>,
}

impl DeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            devices: Vec::new(),
        }
    }

    /// Store at `devices.json` in the config directory
    pub fn in_config_dir() -> Self {
        Self::new(get_config_dir().join(DEVICES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, replacing the in-memory list.
    ///
    /// A missing file is an empty list. Entries that don't parse are skipped.
    /// Returns the number of devices loaded.
    pub fn load(&mut self) -> Result<usize, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No device store at {}", self.path.display());
                self.devices.clear();
                return Ok(0);
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let entries: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        self.devices = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<DeviceConfig>(entry) {
                Ok(device) => Some(device),
                Err(e) => {
                    tracing::warn!("Invalid device entry will be ignored: {}", e);
                    None
                }
            })
            .collect();

        tracing::info!(
            "Loaded {} device(s) from {}",
            self.devices.len(),
            self.path.display()
        );
        Ok(self.devices.len())
    }

    /// Write the list to disk, creating the directory if needed
    pub fn store(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(&self.devices)?;
        std::fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn all(&self) -> &[DeviceConfig] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get_by_id_or_address(&self, id: &str, address: &str) -> Option<&DeviceConfig> {
        self.devices
            .iter()
            .find(|d| d.id == id || d.address == address)
    }

    /// Insert or replace (matched by id, then address) and persist
    pub fn add_or_update(&mut self, device: DeviceConfig) -> Result<(), StoreError> {
        let existing = self
            .devices
            .iter()
            .position(|d| d.id == device.id)
            .or_else(|| self.devices.iter().position(|d| d.address == device.address));

        match existing {
            Some(index) => {
                tracing::debug!("Replacing device {} with {:?}", self.devices[index].id, device);
                self.devices[index] = device;
            }
            None => {
                tracing::debug!("Adding device {:?}", device);
                self.devices.push(device);
            }
        }
        self.store()
    }

    /// Remove and persist. Returns whether the device existed.
    pub fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let before = self.devices.len();
        self.devices.retain(|d| d.id != id);
        if self.devices.len() == before {
            return Ok(false);
        }
        self.store()?;
        Ok(true)
    }

    /// Forget all devices and delete the file
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.devices.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
