//! Last-connected device persistence.
//!
//! The supervisor remembers the last scale it reached `Ready` on so it can
//! reconnect automatically after a process or radio restart. The record is a
//! small JSON file: address, display name, and whether auto-reconnect is
//! wanted. Cleared on user-initiated disconnect.

use crate::mac_address::MacAddress;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("i/o error on state file: {0}")]
    Io(#[from] io::Error),
    #[error("state file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("state file holds an invalid address: {0}")]
    Address(#[from] crate::mac_address::ParseMacError),
}

/// The persisted record. The address is stored in display form so the file
/// stays hand-editable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub address: String,
    pub name: Option<String>,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

fn default_auto_reconnect() -> bool {
    true
}

impl KnownDevice {
    pub fn new(address: MacAddress, name: Option<String>) -> Self {
        KnownDevice {
            address: address.to_string(),
            name,
            auto_reconnect: true,
        }
    }

    pub fn mac(&self) -> Result<MacAddress, PersistError> {
        Ok(MacAddress::from_str(&self.address)?)
    }
}

/// File-backed store for the last-connected scale.
#[derive(Debug, Clone)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DeviceStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted device, `Ok(None)` when none was ever saved.
    pub fn load(&self) -> Result<Option<KnownDevice>, PersistError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, device: &KnownDevice) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(device)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Forget the persisted device. Missing file is fine.
    pub fn clear(&self) -> Result<(), PersistError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
