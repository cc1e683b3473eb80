//! Persisted settings for the doorbell controller
//!
//! Two independently keyed records, each read and written as a whole:
//! `AppSettings` (sensor credential + pairing state) and `WifiSettings`
//! (owned by the network-setup collaborator). Loading from an empty store
//! yields the documented defaults; saves are atomic and commit to memory
//! only after the record is durably on disk.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::{limits, paths, sensor};
use fb_error::{FingerbellError, Result};

/// Application settings record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Opaque credential the driver presents to the sensor on connect
    #[serde(default = "default_sensor_pin")]
    pub sensor_pin: String,
    /// Hex pairing code last written to the sensor ("" = never paired)
    #[serde(default)]
    pub sensor_pairing_code: String,
    /// Whether the stored code is currently trusted to match the sensor
    #[serde(default)]
    pub sensor_pairing_valid: bool,
}

fn default_sensor_pin() -> String {
    sensor::DEFAULT_SENSOR_PIN.to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            sensor_pin: default_sensor_pin(),
            sensor_pairing_code: String::new(),
            sensor_pairing_valid: false,
        }
    }
}

/// Wifi settings record
///
/// The controller core only reads this; provisioning belongs to the
/// network-setup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSettings {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_hostname() -> String {
    "fingerbell".to_string()
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            hostname: default_hostname(),
        }
    }
}

impl WifiSettings {
    /// True once an SSID has been provisioned
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Directory-backed settings store holding both records in memory
pub struct SettingsStore {
    dir: PathBuf,
    app: AppSettings,
    wifi: WifiSettings,
}

impl SettingsStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// Missing record files yield defaults; an unreadable directory or a
    /// corrupt/oversized record file is an error.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                FingerbellError::settings(format!(
                    "Failed to create settings directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let app = load_record(&dir.join(paths::APP_SETTINGS_FILE))?;
        let wifi = load_record(&dir.join(paths::WIFI_SETTINGS_FILE))?;

        Ok(Self { dir, app, wifi })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current application settings record
    pub fn app(&self) -> AppSettings {
        self.app.clone()
    }

    /// Current wifi settings record
    pub fn wifi(&self) -> WifiSettings {
        self.wifi.clone()
    }

    /// Persist a whole application record, then commit it to memory.
    ///
    /// On failure the in-memory record is left unchanged so the caller
    /// can retry against last-known-good state.
    pub fn save_app(&mut self, settings: AppSettings) -> Result<()> {
        write_record(&self.app_path(), &settings)?;
        self.app = settings;
        Ok(())
    }

    /// Persist a whole wifi record, then commit it to memory
    pub fn save_wifi(&mut self, settings: WifiSettings) -> Result<()> {
        write_record(&self.wifi_path(), &settings)?;
        self.wifi = settings;
        Ok(())
    }

    /// Apply a mutation to the application record and persist it
    pub fn update_app<F>(&mut self, updater: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut next = self.app.clone();
        updater(&mut next);
        write_record(&self.app_path(), &next)?;
        self.app = next;
        Ok(self.app.clone())
    }

    /// Factory-reset flow: remove the application record and re-arm defaults
    pub fn clear_app(&mut self) -> Result<()> {
        let path = self.app_path();
        if path.exists() {
            fs::remove_file(&path).map_err(|e| FingerbellError::FileWrite {
                path: path.clone(),
                source: e,
            })?;
        }
        self.app = AppSettings::default();
        Ok(())
    }

    fn app_path(&self) -> PathBuf {
        self.dir.join(paths::APP_SETTINGS_FILE)
    }

    fn wifi_path(&self) -> PathBuf {
        self.dir.join(paths::WIFI_SETTINGS_FILE)
    }
}

fn load_record<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        debug!("Settings record {} absent, using defaults", path.display());
        return Ok(T::default());
    }

    let size = fs::metadata(path)
        .map_err(|e| FingerbellError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?
        .len();
    if size > limits::MAX_SETTINGS_FILE_SIZE {
        return Err(FingerbellError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            max_size: limits::MAX_SETTINGS_FILE_SIZE,
        });
    }

    let content = fs::read_to_string(path).map_err(|e| FingerbellError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let record = serde_json::from_str(&content)?;
    Ok(record)
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;

    // Atomic write: temp file in the same directory, sync, then rename,
    // so a crash mid-write cannot tear the record.
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|e| FingerbellError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    file.write_all(json.as_bytes())
        .map_err(|e| FingerbellError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;

    file.sync_all().map_err(|e| FingerbellError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    drop(file);

    fs::rename(&temp_path, path).map_err(|e| FingerbellError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_on_empty_dir_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::open(tmp.path().join("cfg")).unwrap();

        let app = store.app();
        assert_eq!(app.sensor_pin, "00000000");
        assert_eq!(app.sensor_pairing_code, "");
        assert!(!app.sensor_pairing_valid);

        let wifi = store.wifi();
        assert_eq!(wifi.hostname, "fingerbell");
        assert!(!wifi.is_configured());
    }

    #[test]
    fn save_and_reopen_round_trips_both_records() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cfg");

        {
            let mut store = SettingsStore::open(&dir).unwrap();
            store
                .save_app(AppSettings {
                    sensor_pin: "12345678".into(),
                    sensor_pairing_code: "ab".repeat(16),
                    sensor_pairing_valid: true,
                })
                .unwrap();
            store
                .save_wifi(WifiSettings {
                    ssid: "doorbell-net".into(),
                    password: "hunter2".into(),
                    hostname: "porch".into(),
                })
                .unwrap();
        }

        let store = SettingsStore::open(&dir).unwrap();
        assert_eq!(store.app().sensor_pin, "12345678");
        assert!(store.app().sensor_pairing_valid);
        assert_eq!(store.wifi().ssid, "doorbell-net");
        assert!(store.wifi().is_configured());
    }

    #[test]
    fn update_app_persists_the_mutation() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cfg");

        let mut store = SettingsStore::open(&dir).unwrap();
        let updated = store
            .update_app(|app| {
                app.sensor_pairing_code = "deadbeef".into();
                app.sensor_pairing_valid = true;
            })
            .unwrap();
        assert!(updated.sensor_pairing_valid);

        let reopened = SettingsStore::open(&dir).unwrap();
        assert_eq!(reopened.app().sensor_pairing_code, "deadbeef");
    }

    #[test]
    fn failed_save_leaves_memory_unchanged() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cfg");
        let mut store = SettingsStore::open(&dir).unwrap();

        // Occupy the temp path with a directory so the write cannot start.
        fs::create_dir_all(dir.join("app_settings.json.tmp")).unwrap();

        let before = store.app();
        let result = store.save_app(AppSettings {
            sensor_pin: "99999999".into(),
            ..AppSettings::default()
        });
        assert!(result.is_err());
        assert_eq!(store.app(), before);
    }

    #[test]
    fn clear_app_removes_the_record_and_resets_defaults() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cfg");

        let mut store = SettingsStore::open(&dir).unwrap();
        store
            .update_app(|app| {
                app.sensor_pairing_code = "cafe".into();
                app.sensor_pairing_valid = true;
            })
            .unwrap();
        store.clear_app().unwrap();

        assert_eq!(store.app(), AppSettings::default());
        let reopened = SettingsStore::open(&dir).unwrap();
        assert_eq!(reopened.app(), AppSettings::default());
    }

    #[test]
    fn corrupt_record_is_an_error_not_a_default() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cfg");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(paths::APP_SETTINGS_FILE), "{not json").unwrap();

        assert!(SettingsStore::open(&dir).is_err());
    }

    #[test]
    fn oversized_record_is_rejected_before_parsing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cfg");
        fs::create_dir_all(&dir).unwrap();
        let big = " ".repeat((limits::MAX_SETTINGS_FILE_SIZE + 1) as usize);
        fs::write(dir.join(paths::APP_SETTINGS_FILE), big).unwrap();

        match SettingsStore::open(&dir) {
            Err(FingerbellError::FileTooLarge { .. }) => {}
            other => panic!("expected FileTooLarge, got {:?}", other.err()),
        }
    }
}
