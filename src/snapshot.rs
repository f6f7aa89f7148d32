//! The published status snapshot (`data/latest.json`).
//!
//! Every status change in the capture loop or the classifier workers goes
//! through `write_latest`, which publishes atomically with a
//! write-temp-then-rename inside the snapshot's own directory.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::classify::Prediction;
use crate::config::Settings;
use crate::state::App;
use crate::store::LogEntry;
use crate::utils::text::normalize_confidence_f64;
use crate::utils::time::{now_iso, parse_timestamp};
use crate::utils::url::safe_stream_url;

/// Pipeline status published to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting on configuration or input.
    Idle,
    /// Capture is running.
    Listening,
    /// Something needs operator attention.
    Error,
}

/// The most recent recorded detection, embedded in the snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LastDetection {
    /// When the detection was recorded.
    pub timestamp: String,
    /// Species common name.
    pub species: String,
    /// Species scientific name.
    pub scientific_name: String,
    /// Confidence of the top prediction.
    pub confidence: Option<f64>,
    /// Segment length at the time of the detection.
    pub clip_seconds: f64,
    /// Top predictions recorded together (≤ 3).
    pub top_predictions: Vec<Prediction>,
    /// Location label.
    pub location: String,
    /// Icon URL for the species, when one exists.
    pub icon_url: String,
}

/// Build the full snapshot payload.
///
/// `settings` is the caller's config snapshot; workers pass a copy with the
/// effective week substituted when auto-week is on.
#[must_use]
pub fn build_payload(
    app: &App,
    settings: &Settings,
    status: Status,
    status_message: &str,
    predictions: &[Prediction],
) -> Value {
    let icon_index = app.store.load_icon_index();

    let last = app.last_detection().map(|last| {
        let mut value = serde_json::to_value(&last).unwrap_or_else(|_| json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "times_heard".to_string(),
                json!(app.store.species_heard_count(&last.species)),
            );
            map.insert(
                "species_rank".to_string(),
                json!(app.store.species_rank(&last.species)),
            );
            map.insert(
                "icon_url".to_string(),
                json!(app.store.icon_url_for(&last.species, &icon_index)),
            );
        }
        (value, last.timestamp)
    });

    let top = predictions.first();
    let species = top.map_or("No detection", |p| p.species.as_str());
    let scientific_name = top.map_or("", |p| p.scientific_name.as_str());
    let confidence = top.and_then(|p| p.confidence);
    let times_heard = if species == "No detection" {
        0
    } else {
        app.store.species_heard_count(species)
    };

    json!({
        "timestamp": now_iso(),
        "species": species,
        "scientific_name": scientific_name,
        "confidence": confidence,
        "status": status,
        "status_message": status_message,
        "stream_url": safe_stream_url(&settings.stream_url),
        "clip_seconds": settings.segment_seconds,
        "model": "BirdNET",
        "times_heard": times_heard,
        "location": settings.location,
        "latitude": settings.latitude,
        "longitude": settings.longitude,
        "week": settings.week,
        "top_predictions": predictions,
        "last_detection": last.as_ref().map(|(value, _)| value.clone()),
        "last_heard": last.as_ref().map(|(_, stamp)| stamp.clone()),
        "icon_url": app.store.icon_url_for(species, &icon_index),
        "log_revision": app.store.revision(),
        "species_count": app.store.species_count(),
        "species_rank": app.store.species_rank(species),
        "overlay_hold_seconds": settings.overlay_hold_seconds,
        "overlay_sticky": settings.overlay_sticky,
    })
}

/// Publish a snapshot payload atomically.
///
/// A missing `timestamp` field is stamped with the current time. Failures
/// are logged and swallowed; a stale snapshot beats a dead worker.
pub fn write_latest(app: &App, mut payload: Value) {
    if let Some(map) = payload.as_object_mut() {
        let needs_stamp = map
            .get("timestamp")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty);
        if needs_stamp {
            map.insert("timestamp".to_string(), json!(now_iso()));
        }
    }
    let encoded = match serde_json::to_string_pretty(&payload) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("snapshot encode failed: {e}");
            return;
        }
    };
    let tmp_path = app.paths.latest.with_extension("tmp");
    let _guard = app
        .latest_lock
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Err(e) = std::fs::write(&tmp_path, encoded)
        .and_then(|()| std::fs::rename(&tmp_path, &app.paths.latest))
    {
        warn!("snapshot publish failed: {e}");
    }
}

/// Read the published snapshot, degrading to an empty object.
#[must_use]
pub fn read_latest(app: &App) -> Value {
    let Ok(raw) = std::fs::read_to_string(&app.paths.latest) else {
        return json!({});
    };
    serde_json::from_str(&raw).unwrap_or_else(|_| json!({}))
}

/// Derive the most recent detection record from log entries.
///
/// Entries sharing the latest timestamp are grouped and ordered by
/// confidence; the top three become the record's predictions.
#[must_use]
pub fn derive_last_detection(
    app: &App,
    entries: &[LogEntry],
    settings: &Settings,
) -> Option<LastDetection> {
    if entries.is_empty() {
        return None;
    }

    let mut latest: Option<&str> = None;
    let mut latest_dt = None;
    for entry in entries {
        match parse_timestamp(&entry.timestamp) {
            Some(dt) => {
                if latest_dt.is_none_or(|seen| dt > seen) {
                    latest_dt = Some(dt);
                    latest = Some(&entry.timestamp);
                }
            }
            None => {
                if latest_dt.is_none()
                    && !entry.timestamp.is_empty()
                    && latest.is_none_or(|seen| entry.timestamp.as_str() > seen)
                {
                    latest = Some(&entry.timestamp);
                }
            }
        }
    }
    let latest = latest?;

    let mut grouped: Vec<&LogEntry> = entries
        .iter()
        .filter(|entry| entry.timestamp == latest)
        .collect();
    if grouped.is_empty() {
        return None;
    }
    grouped.sort_by(|a, b| {
        let left = normalize_confidence_f64(a.confidence).unwrap_or(0.0);
        let right = normalize_confidence_f64(b.confidence).unwrap_or(0.0);
        right.partial_cmp(&left).unwrap_or(std::cmp::Ordering::Equal)
    });
    let top = grouped[0];
    let icon_index = app.store.load_icon_index();

    let predictions = grouped
        .iter()
        .take(3)
        .map(|entry| Prediction {
            species: entry.species_label().to_string(),
            scientific_name: entry.scientific_name.clone(),
            confidence: entry.confidence,
        })
        .collect();

    let location = if top.location.is_empty() {
        settings.location.clone()
    } else {
        top.location.clone()
    };
    Some(LastDetection {
        timestamp: top.timestamp.clone(),
        species: top.species_label().to_string(),
        scientific_name: top.scientific_name.clone(),
        confidence: top.confidence,
        clip_seconds: settings.segment_seconds,
        top_predictions: predictions,
        location,
        icon_url: app.store.icon_url_for(top.species_label(), &icon_index),
    })
}

/// Re-derive the last-detection record from the full log and patch the
/// published snapshot in place.
pub fn refresh_last_detection(app: &App) {
    let settings = app.config.snapshot();
    let entries = app.store.read_log(None);
    let latest = derive_last_detection(app, &entries, &settings);
    app.set_last_detection(latest.clone());

    let mut payload = read_latest(app);
    if !payload.is_object() {
        payload = json!({});
    }
    if let Some(map) = payload.as_object_mut() {
        let last_value = latest
            .as_ref()
            .map(|last| serde_json::to_value(last).unwrap_or_else(|_| json!({})));
        map.insert(
            "last_heard".to_string(),
            json!(latest.as_ref().map(|last| last.timestamp.clone())),
        );
        map.insert("last_detection".to_string(), json!(last_value));
        map.insert("log_revision".to_string(), json!(app.store.revision()));
        map.insert("species_count".to_string(), json!(app.store.species_count()));
    }
    write_latest(app, payload);
}

/// Publish the first-boot snapshot when none exists yet.
pub fn ensure_latest_file(app: &App) {
    if app.paths.latest.exists() {
        refresh_last_detection(app);
        return;
    }
    let settings = app.config.snapshot();
    let payload = build_payload(app, &settings, Status::Idle, "Waiting for BirdNET", &[]);
    write_latest(app, payload);
    refresh_last_detection(app);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::state::App;
    use std::sync::Arc;

    fn test_app() -> (tempfile::TempDir, Arc<App>) {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(dir.path()).unwrap();
        (dir, app)
    }

    fn log_entry(species: &str, stamp: &str, confidence: f64) -> LogEntry {
        LogEntry {
            timestamp: stamp.to_string(),
            species: species.to_string(),
            scientific_name: format!("{species} sci"),
            confidence: Some(confidence),
            location: "Yard".to_string(),
            ..LogEntry::default()
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_write_latest_atomic_and_readable() {
        let (_dir, app) = test_app();
        write_latest(&app, json!({"status": "idle", "species": "No detection"}));
        let read = read_latest(&app);
        assert_eq!(read["status"], "idle");
        assert!(read["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(!app.paths.latest.with_extension("tmp").exists());
    }

    #[test]
    #[serial_test::serial]
    fn test_build_payload_without_predictions() {
        let (_dir, app) = test_app();
        let settings = app.config.snapshot();
        let payload = build_payload(&app, &settings, Status::Idle, "Waiting", &[]);
        assert_eq!(payload["species"], "No detection");
        assert_eq!(payload["status"], "idle");
        assert_eq!(payload["status_message"], "Waiting");
        assert_eq!(payload["times_heard"], 0);
        assert_eq!(payload["model"], "BirdNET");
        assert!(payload["last_detection"].is_null());
        assert!(payload["log_revision"].as_i64().unwrap() > 0);
    }

    #[test]
    #[serial_test::serial]
    fn test_build_payload_with_predictions_and_counts() {
        let (_dir, app) = test_app();
        let mut entries = vec![
            log_entry("American Robin", "2024-05-01T10:00:00Z", 0.91),
            log_entry("American Robin", "2024-05-02T10:00:00Z", 0.80),
        ];
        app.store.append_detections(&mut entries).unwrap();

        let settings = app.config.snapshot();
        let predictions = vec![Prediction {
            species: "American Robin".to_string(),
            scientific_name: "Turdus migratorius".to_string(),
            confidence: Some(0.91),
        }];
        let payload = build_payload(&app, &settings, Status::Listening, "Detected", &predictions);
        assert_eq!(payload["species"], "American Robin");
        assert_eq!(payload["confidence"], 0.91);
        assert_eq!(payload["times_heard"], 2);
        assert_eq!(payload["species_rank"], 1);
        assert_eq!(payload["top_predictions"][0]["confidence"], 0.91);
        assert_eq!(payload["status"], "listening");
    }

    #[test]
    #[serial_test::serial]
    fn test_derive_last_detection_groups_latest_timestamp() {
        let (_dir, app) = test_app();
        let settings = app.config.snapshot();
        let entries = vec![
            log_entry("Old Bird", "2024-05-01T10:00:00Z", 0.9),
            log_entry("Jay", "2024-05-03T08:00:00Z", 0.4),
            log_entry("Robin", "2024-05-03T08:00:00Z", 0.8),
        ];
        let last = derive_last_detection(&app, &entries, &settings).unwrap();
        assert_eq!(last.timestamp, "2024-05-03T08:00:00Z");
        assert_eq!(last.species, "Robin");
        assert_eq!(last.top_predictions.len(), 2);
        assert_eq!(last.top_predictions[0].species, "Robin");
        assert_eq!(last.top_predictions[1].species, "Jay");
    }

    #[test]
    #[serial_test::serial]
    fn test_derive_last_detection_empty() {
        let (_dir, app) = test_app();
        let settings = app.config.snapshot();
        assert!(derive_last_detection(&app, &[], &settings).is_none());
    }

    #[test]
    #[serial_test::serial]
    fn test_refresh_patches_snapshot() {
        let (_dir, app) = test_app();
        ensure_latest_file(&app);

        let mut entries = vec![log_entry("Robin", "2024-05-03T08:00:00Z", 0.8)];
        app.store.append_detections(&mut entries).unwrap();
        refresh_last_detection(&app);

        let read = read_latest(&app);
        assert_eq!(read["last_detection"]["species"], "Robin");
        assert_eq!(read["last_heard"], "2024-05-03T08:00:00Z");
        assert_eq!(read["species_count"], 1);
        // Fields from the boot payload survive the patch.
        assert_eq!(read["status"], "idle");
    }

    #[test]
    #[serial_test::serial]
    fn test_ensure_latest_file_first_boot() {
        let (_dir, app) = test_app();
        assert!(!app.paths.latest.exists());
        ensure_latest_file(&app);
        let read = read_latest(&app);
        assert_eq!(read["status"], "idle");
        assert_eq!(read["status_message"], "Waiting for BirdNET");
        assert_eq!(read["species"], "No detection");
    }
}
