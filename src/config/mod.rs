//! Settings loading, persistence, and live updates.

mod types;
mod update;

pub use types::{InputMode, Settings, WeatherUnit};
pub use update::{PATCH_KEYS, RESTART_KEYS, apply_key};

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::hash_password;
use crate::error::{Error, Result};
use crate::paths::ProjectPaths;
use crate::utils::time::current_week;

/// Environment overrides, as `(wire key, variable name)` pairs.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("http_port", "HTTP_PORT"),
    ("input_mode", "INPUT_MODE"),
    ("input_device", "INPUT_DEVICE"),
    ("rtmp_url", "RTMP_URL"),
    ("segment_seconds", "SEGMENT_SECONDS"),
    ("min_confidence", "MIN_CONFIDENCE"),
    ("silence_threshold_db", "SILENCE_THRESHOLD_DB"),
    ("silence_min_seconds", "SILENCE_MIN_SECONDS"),
    ("overlay_hold_seconds", "OVERLAY_HOLD_SECONDS"),
    ("overlay_sticky", "OVERLAY_STICKY"),
    ("birdnet_template", "BIRDNET_TEMPLATE"),
    ("birdnet_workdir", "BIRDNET_WORKDIR"),
    ("location", "LOCATION_LABEL"),
    ("latitude", "LATITUDE"),
    ("longitude", "LONGITUDE"),
    ("week", "WEEK"),
    ("auto_week", "AUTO_WEEK"),
    ("weather_location", "WEATHER_LOCATION"),
    ("weather_unit", "WEATHER_UNIT"),
    ("settings_auth_enabled", "SETTINGS_AUTH_ENABLED"),
    ("settings_auth_user", "SETTINGS_AUTH_USER"),
    ("settings_auth_password_hash", "SETTINGS_AUTH_PASSWORD_HASH"),
];

/// Auth settings projected for the HTTP gate.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Whether auth is required at all.
    pub enabled: bool,
    /// Expected username.
    pub user: String,
    /// Stored password hash.
    pub password_hash: String,
}

/// Live settings store with JSON persistence and restart signalling.
pub struct ConfigStore {
    path: PathBuf,
    inner: Mutex<Settings>,
    restart_capture: AtomicBool,
}

impl ConfigStore {
    /// Load settings from the canonical file (falling back to the legacy
    /// file), overlay environment overrides, and consolidate to the
    /// canonical file when it does not exist yet.
    pub fn load(paths: &ProjectPaths) -> Result<Self> {
        let mut settings = Settings::default();

        let source = if paths.settings.exists() {
            Some(&paths.settings)
        } else if paths.legacy_settings.exists() {
            Some(&paths.legacy_settings)
        } else {
            None
        };
        if let Some(source) = source {
            match read_settings_file(source) {
                Ok(map) => {
                    for (key, value) in &map {
                        apply_key(&mut settings, key, value);
                    }
                }
                Err(e) => warn!("ignoring unreadable settings file: {e}"),
            }
        }

        for (key, env_name) in ENV_OVERRIDES {
            if let Ok(raw) = std::env::var(env_name) {
                if raw.is_empty() {
                    continue;
                }
                apply_key(&mut settings, key, &Value::String(raw));
            }
        }
        if let Ok(plain) = std::env::var("SETTINGS_AUTH_PASSWORD") {
            if !plain.is_empty() {
                settings.auth_password_hash = hash_password(&plain);
                settings.auth_enabled = true;
            }
        }
        if settings.weather_location.is_empty() {
            settings.weather_location = "YOUR_ZIP".to_string();
        }

        let store = Self {
            path: paths.settings.clone(),
            inner: Mutex::new(settings),
            restart_capture: AtomicBool::new(false),
        };
        if !paths.settings.exists() {
            store.persist()?;
        }
        Ok(store)
    }

    /// Clone the current settings.
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Settings snapshot for clients: password hash removed, computed
    /// `current_week` added.
    #[must_use]
    pub fn public_snapshot(&self) -> Value {
        let mut value = serde_json::to_value(self.snapshot()).unwrap_or_else(|_| Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("settings_auth_password_hash");
            map.insert("current_week".to_string(), Value::from(current_week()));
        }
        value
    }

    /// Auth settings for the HTTP gate. Auth without a stored hash is
    /// treated as disabled.
    #[must_use]
    pub fn auth_settings(&self) -> AuthSettings {
        let settings = self.snapshot();
        AuthSettings {
            enabled: settings.auth_enabled && !settings.auth_password_hash.is_empty(),
            user: settings.auth_user,
            password_hash: settings.auth_password_hash,
        }
    }

    /// Apply an allow-listed patch. Returns the sorted list of changed
    /// keys; persists when anything changed and raises the capture-restart
    /// signal when a capture-affecting key changed.
    pub fn apply_patch(&self, updates: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut changed = Vec::new();
        {
            let mut settings = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for (key, value) in updates {
                if !PATCH_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if apply_key(&mut settings, key, value) {
                    changed.push(key.clone());
                }
            }
        }
        if !changed.is_empty() {
            if let Err(e) = self.persist() {
                warn!("failed to persist settings: {e}");
            }
        }
        if changed.iter().any(|key| RESTART_KEYS.contains(&key.as_str())) {
            debug!("capture-affecting settings changed: requesting restart");
            self.signal_restart();
        }
        changed.sort();
        changed
    }

    /// Write the current settings to the canonical file.
    pub fn persist(&self) -> Result<()> {
        let settings = self.snapshot();
        let encoded = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, encoded).map_err(|source| Error::SettingsWrite {
            path: self.path.clone(),
            source,
        })
    }

    /// Raise the edge-triggered capture-restart signal.
    pub fn signal_restart(&self) {
        self.restart_capture.store(true, Ordering::SeqCst);
    }

    /// Consume the capture-restart signal if raised.
    #[must_use]
    pub fn take_restart_signal(&self) -> bool {
        self.restart_capture.swap(false, Ordering::SeqCst)
    }

    /// Whether the restart signal is currently raised.
    #[must_use]
    pub fn restart_requested(&self) -> bool {
        self.restart_capture.load(Ordering::SeqCst)
    }
}

fn read_settings_file(path: &Path) -> Result<serde_json::Map<String, Value>> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::SettingsRead {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|source| Error::SettingsParse {
            path: path.to_path_buf(),
            source,
        })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_in(dir: &Path) -> (ProjectPaths, ConfigStore) {
        let paths = ProjectPaths::new(dir);
        paths.ensure_directories().unwrap();
        let store = ConfigStore::load(&paths).unwrap();
        (paths, store)
    }

    #[test]
    #[serial_test::serial]
    fn test_load_writes_canonical_file() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, _store) = store_in(dir.path());
        assert!(paths.settings.exists());
        let raw = std::fs::read_to_string(&paths.settings).unwrap();
        assert!(raw.contains("\"rtmp_url\""));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_falls_back_to_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.ensure_directories().unwrap();
        std::fs::write(&paths.legacy_settings, r#"{"http_port": 9100}"#).unwrap();
        let store = ConfigStore::load(&paths).unwrap();
        assert_eq!(store.snapshot().http_port, 9100);
        // Consolidated into the canonical file.
        assert!(paths.settings.exists());
    }

    #[test]
    #[serial_test::serial]
    fn test_patch_reports_changed_and_signals_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (_paths, store) = store_in(dir.path());

        let patch = json!({"rtmp_url": "rtsp://example/stream", "min_confidence": 0.4});
        let changed = store.apply_patch(patch.as_object().unwrap());
        assert_eq!(changed, vec!["min_confidence", "rtmp_url"]);
        assert!(store.take_restart_signal());
        assert!(!store.take_restart_signal());
        assert_eq!(store.snapshot().stream_url, "rtsp://example/stream");
    }

    #[test]
    #[serial_test::serial]
    fn test_patch_ignores_unknown_and_auth_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (_paths, store) = store_in(dir.path());

        let patch = json!({
            "settings_auth_enabled": true,
            "no_such": 1,
            "location": "Garden"
        });
        let changed = store.apply_patch(patch.as_object().unwrap());
        assert_eq!(changed, vec!["location"]);
        assert!(!store.snapshot().auth_enabled);
        assert!(!store.restart_requested());
    }

    #[test]
    #[serial_test::serial]
    fn test_public_snapshot_hides_hash_and_adds_week() {
        let dir = tempfile::tempdir().unwrap();
        let (_paths, store) = store_in(dir.path());
        let snapshot = store.public_snapshot();
        let map = snapshot.as_object().unwrap();
        assert!(!map.contains_key("settings_auth_password_hash"));
        let week = map["current_week"].as_i64().unwrap();
        assert!((1..=48).contains(&week));
    }

    #[test]
    #[serial_test::serial]
    fn test_unchanged_patch_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_paths, store) = store_in(dir.path());
        let patch = json!({"location": "Stream"});
        assert!(store.apply_patch(patch.as_object().unwrap()).is_empty());
        assert!(!store.restart_requested());
    }
}
