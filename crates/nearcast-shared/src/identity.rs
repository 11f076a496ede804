//! Local device settings: stable device id, self-reported display name,
//! and the last room joined. Stored as a small JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::types::{Device, DeviceId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub device_id: DeviceId,
    pub display_name: String,
    #[serde(default)]
    pub last_room: Option<String>,
}

impl DeviceSettings {
    /// Create settings for a brand new installation.
    pub fn generate() -> Self {
        Self {
            device_id: DeviceId::generate(),
            display_name: default_display_name(),
            last_room: None,
        }
    }

    /// The local device as announced to the room.
    pub fn device(&self) -> Device {
        Device {
            id: self.device_id.clone(),
            display_name: self.display_name.clone(),
        }
    }

    /// Load settings from `path`, creating and persisting fresh ones if the
    /// file does not exist yet. The device id stays stable across runs.
    pub fn load_or_create(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        } else {
            let settings = Self::generate();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Platform settings file location (`<config dir>/nearcast/settings.json`).
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let dirs = directories::ProjectDirs::from("", "", "nearcast")
            .ok_or(SettingsError::NoSettingsDir)?;
        Ok(dirs.config_dir().join("settings.json"))
    }
}

fn default_display_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_lowercase())
        .collect();
    format!("device-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_created_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let first = DeviceSettings::load_or_create(&path).unwrap();
        let second = DeviceSettings::load_or_create(&path).unwrap();

        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.display_name, second.display_name);
    }

    #[test]
    fn test_last_room_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = DeviceSettings::load_or_create(&path).unwrap();
        settings.last_room = Some("042".to_string());
        settings.save(&path).unwrap();

        let reloaded = DeviceSettings::load_or_create(&path).unwrap();
        assert_eq!(reloaded.last_room.as_deref(), Some("042"));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("settings.json");

        DeviceSettings::generate().save(&path).unwrap();
        assert!(path.exists());
    }
}
