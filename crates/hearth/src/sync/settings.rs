//! Device settings persisted as JSON in engine metadata.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::storage::StorageEngine;

use super::invite::RoomCredentials;

pub const SETTINGS_KEY: &str = "hearth:device-settings";

pub const DEFAULT_DEVICE_NAME: &str = "My device";

const DEVICE_NAME_MAX: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    pub device_id: String,
    pub device_name: String,
    #[serde(default)]
    pub room: Option<RoomCredentials>,
    #[serde(default)]
    pub sync_enabled: bool,
}

impl DeviceSettings {
    fn fresh() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            room: None,
            sync_enabled: false,
        }
    }
}

/// Trimmed name, 1..=64 characters.
pub fn normalize_device_name(name: &str) -> Result<String, SettingsError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > DEVICE_NAME_MAX {
        return Err(SettingsError::InvalidDeviceName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

pub struct SettingsStore {
    engine: Arc<dyn StorageEngine>,
    cached: Mutex<Option<DeviceSettings>>,
}

impl SettingsStore {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            cached: Mutex::new(None),
        }
    }

    /// Load the settings, creating and persisting a fresh device id on first
    /// run.
    pub fn load_or_init(&self) -> Result<DeviceSettings, SettingsError> {
        if let Some(settings) = self.cached.lock().clone() {
            return Ok(settings);
        }
        let settings: DeviceSettings = match self.engine.get_meta(SETTINGS_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| SettingsError::Corrupt(e.to_string()))?,
            None => {
                let fresh = DeviceSettings::fresh();
                let raw = serde_json::to_string(&fresh)
                    .map_err(|e| SettingsError::Corrupt(e.to_string()))?;
                // Another session may have initialised concurrently.
                let winner = self.engine.claim_meta(SETTINGS_KEY, &raw)?;
                serde_json::from_str(&winner).map_err(|e| SettingsError::Corrupt(e.to_string()))?
            }
        };
        *self.cached.lock() = Some(settings.clone());
        Ok(settings)
    }

    pub fn get(&self) -> Result<DeviceSettings, SettingsError> {
        self.load_or_init()
    }

    fn save(&self, settings: DeviceSettings) -> Result<DeviceSettings, SettingsError> {
        let raw = serde_json::to_string(&settings).map_err(|e| SettingsError::Corrupt(e.to_string()))?;
        self.engine.set_meta(SETTINGS_KEY, &raw)?;
        *self.cached.lock() = Some(settings.clone());
        Ok(settings)
    }

    fn modify(&self, f: impl FnOnce(&mut DeviceSettings)) -> Result<DeviceSettings, SettingsError> {
        let mut settings = self.load_or_init()?;
        f(&mut settings);
        self.save(settings)
    }

    pub fn set_device_name(&self, name: &str) -> Result<DeviceSettings, SettingsError> {
        let name = normalize_device_name(name)?;
        self.modify(|s| s.device_name = name)
    }

    pub fn set_room(&self, room: Option<RoomCredentials>) -> Result<DeviceSettings, SettingsError> {
        self.modify(|s| s.room = room)
    }

    pub fn set_sync_enabled(&self, enabled: bool) -> Result<DeviceSettings, SettingsError> {
        self.modify(|s| s.sync_enabled = enabled)
    }
}
