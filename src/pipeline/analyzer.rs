//! Classifier worker: per-segment analysis protocol.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{ClassifierRequest, Prediction, run_classifier};
use crate::config::Settings;
use crate::constants::ANALYSIS_MIN_CONF;
use crate::pipeline::PipelineShared;
use crate::snapshot::{LastDetection, Status, build_payload, write_latest};
use crate::state::App;
use crate::store::LogEntry;
use crate::utils::text::{format_confidence, normalize_confidence_f64};
use crate::utils::time::{current_week, now_iso};

/// Run one classifier worker until a stop is requested.
pub fn analysis_worker(app: &Arc<App>, shared: &Arc<PipelineShared>, worker_id: usize) {
    while !app.should_stop() {
        let Ok(path) = shared.analysis_rx.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        app.store.log_event(
            "analysis",
            &format!("Worker {worker_id} analyzing segment"),
        );
        if path.exists() {
            analyze_segment(app, &path);
        }
        shared.inflight().analysis.remove(&path);
    }
}

/// Record detections above threshold: last-detection cell, log rows, and
/// one `detection` event per prediction, all sharing one timestamp.
fn record_last_detection(app: &App, predictions: &[Prediction], settings: &Settings) {
    let Some(top) = predictions.first() else {
        return;
    };
    let icon_index = app.store.load_icon_index();
    let timestamp = now_iso();
    app.set_last_detection(Some(LastDetection {
        timestamp: timestamp.clone(),
        species: top.species.clone(),
        scientific_name: top.scientific_name.clone(),
        confidence: top.confidence,
        clip_seconds: settings.segment_seconds,
        top_predictions: predictions.to_vec(),
        location: settings.location.clone(),
        icon_url: app.store.icon_url_for(&top.species, &icon_index),
    }));

    let mut entries: Vec<LogEntry> = predictions
        .iter()
        .map(|prediction| LogEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: timestamp.clone(),
            species: prediction.species.clone(),
            scientific_name: prediction.scientific_name.clone(),
            confidence: normalize_confidence_f64(prediction.confidence),
            location: settings.location.clone(),
            ..LogEntry::default()
        })
        .collect();

    for prediction in predictions {
        let label = format_confidence(prediction.confidence);
        let message = if label.is_empty() {
            format!("Detected {}", prediction.species)
        } else {
            format!("Detected {} ({label})", prediction.species)
        };
        let mut extra = serde_json::Map::new();
        extra.insert("species".to_string(), serde_json::json!(prediction.species));
        extra.insert(
            "scientific_name".to_string(),
            serde_json::json!(prediction.scientific_name),
        );
        extra.insert(
            "confidence".to_string(),
            serde_json::json!(prediction.confidence),
        );
        app.store.log_event_with("detection", &message, extra);
    }

    if let Err(e) = app.store.append_detections(&mut entries) {
        tracing::warn!("failed to append detections: {e}");
    }
}

/// Analyze one segment end to end.
///
/// The segment file is deleted before returning, whatever the outcome; a
/// failed classification is surfaced through the snapshot and the
/// deduplicated error event, never retried.
pub fn analyze_segment(app: &App, path: &Path) {
    let settings = app.config.snapshot();

    if settings.classifier_template.is_empty() {
        let message = "BIRDNET_TEMPLATE not set";
        let payload = build_payload(app, &settings, Status::Idle, message, &[]);
        app.log_analysis_error_deduped(message);
        write_latest(app, payload);
        let _ = std::fs::remove_file(path);
        return;
    }

    let effective_week = if settings.auto_week {
        current_week()
    } else {
        settings.week
    };

    let result = run_classifier(&ClassifierRequest {
        template: &settings.classifier_template,
        workdir: &settings.classifier_workdir,
        input: path,
        output_target: &app.paths.tmp_dir,
        min_confidence: ANALYSIS_MIN_CONF,
        segment_seconds: settings.segment_seconds,
        latitude: settings.latitude,
        longitude: settings.longitude,
        week: effective_week,
    });

    let payload = match result {
        Err(error) => {
            let message = error.to_string();
            let payload = build_payload(app, &settings, Status::Error, &message, &[]);
            app.log_analysis_error_deduped(&message);
            payload
        }
        Ok(predictions) => {
            let threshold = settings.min_confidence;
            let above: Vec<Prediction> = predictions
                .iter()
                .filter(|p| p.confidence_or_zero() >= threshold)
                .take(3)
                .cloned()
                .collect();
            let below: Vec<Prediction> = predictions
                .iter()
                .filter(|p| p.confidence_or_zero() < threshold)
                .take(3)
                .cloned()
                .collect();

            let status_message = if above.is_empty() {
                let label = format_confidence(Some(threshold));
                if label.is_empty() {
                    app.store
                        .log_event("analysis", "No detections above threshold");
                } else {
                    app.store
                        .log_event("analysis", &format!("No detections above {label}"));
                }
                "No detections"
            } else {
                record_last_detection(app, &above, &settings);
                if app.clips.evaluate(path, &above) {
                    app.store.invalidate_summary_cache();
                }
                "Detected"
            };

            if !below.is_empty() {
                let summaries: Vec<String> = below
                    .iter()
                    .map(|p| {
                        let label = format_confidence(p.confidence);
                        if label.is_empty() {
                            p.species.clone()
                        } else {
                            format!("{} ({label})", p.species)
                        }
                    })
                    .collect();
                let mut extra = serde_json::Map::new();
                extra.insert("below_threshold".to_string(), serde_json::json!(true));
                app.store.log_event_with(
                    "detection",
                    &format!("Below threshold: {}", summaries.join(", ")),
                    extra,
                );
            }

            app.clear_analysis_error();
            let effective_settings = Settings {
                week: effective_week,
                ..settings.clone()
            };
            build_payload(
                app,
                &effective_settings,
                Status::Listening,
                status_message,
                &above,
            )
        }
    };

    write_latest(app, payload);
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
#[cfg(unix)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::snapshot::read_latest;

    fn test_app(template: &str) -> (tempfile::TempDir, Arc<App>) {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(dir.path()).unwrap();
        let patch = serde_json::json!({
            "birdnet_template": template,
            "min_confidence": 0.25,
        });
        app.config.apply_patch(patch.as_object().unwrap());
        (dir, app)
    }

    fn stub_script(dir: &Path, csv_body: &str) -> String {
        let script = dir.join("classifier.sh");
        let body = format!(
            "#!/bin/sh\nstem=$(basename \"$1\" .wav)\n\
             printf '%b' '{csv_body}' > \"$2/$stem.BirdNET.results.csv\"\n"
        );
        std::fs::write(&script, body).unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        format!("{} {{input}} {{output}}", script.display())
    }

    fn write_segment(app: &App, name: &str) -> std::path::PathBuf {
        let path = app.paths.tmp_dir.join(name);
        std::fs::write(&path, b"fake wav").unwrap();
        path
    }

    #[test]
    #[serial_test::serial]
    fn test_above_threshold_records_detection() {
        let dir = tempfile::tempdir().unwrap();
        let template = stub_script(
            dir.path(),
            "Common name,Scientific name,Confidence\\nAmerican Robin,Turdus migratorius,0.91\\n",
        );
        let (_root, app) = test_app(&template);
        let segment = write_segment(&app, "segment_000001.wav");

        analyze_segment(&app, &segment);

        assert!(!segment.exists());
        let log = app.store.read_log(None);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].species, "American Robin");
        assert_eq!(log[0].confidence, Some(0.91));

        let latest = read_latest(&app);
        assert_eq!(latest["status"], "listening");
        assert_eq!(latest["status_message"], "Detected");
        assert_eq!(latest["species"], "American Robin");
        assert_eq!(latest["top_predictions"][0]["confidence"], 0.91);

        let events = app.store.read_events(None);
        assert!(
            events
                .iter()
                .any(|e| e.kind == "detection" && e.message.contains("Detected American Robin"))
        );
        // The winning segment entered the clip archive.
        assert!(app.clips.entry_for("American Robin").is_some());
    }

    #[test]
    #[serial_test::serial]
    fn test_below_threshold_logs_near_miss() {
        let dir = tempfile::tempdir().unwrap();
        let template = stub_script(
            dir.path(),
            "Common name,Scientific name,Confidence\\nAmerican Robin,Turdus migratorius,0.10\\n",
        );
        let (_root, app) = test_app(&template);
        let segment = write_segment(&app, "segment_000002.wav");

        analyze_segment(&app, &segment);

        assert!(app.store.read_log(None).is_empty());
        let events = app.store.read_events(None);
        assert!(
            events
                .iter()
                .any(|e| e.kind == "analysis" && e.message == "No detections above 25%")
        );
        let below = events
            .iter()
            .find(|e| e.kind == "detection" && e.message.starts_with("Below threshold:"))
            .unwrap();
        assert_eq!(below.extra["below_threshold"], true);
        assert!(below.message.contains("American Robin (10%)"));
        assert!(app.clips.entry_for("American Robin").is_none());
    }

    #[test]
    #[serial_test::serial]
    fn test_missing_template_goes_idle() {
        let (_root, app) = test_app("");
        let segment = write_segment(&app, "segment_000003.wav");

        analyze_segment(&app, &segment);
        analyze_segment(&app, &write_segment(&app, "segment_000004.wav"));

        assert!(!segment.exists());
        let latest = read_latest(&app);
        assert_eq!(latest["status"], "idle");
        assert_eq!(latest["status_message"], "BIRDNET_TEMPLATE not set");
        // The error event is deduplicated across segments.
        let errors: Vec<_> = app
            .store
            .read_events(None)
            .into_iter()
            .filter(|e| e.kind == "error")
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    #[serial_test::serial]
    fn test_classifier_failure_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'no model' >&2\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let template = format!("{} {{input}} {{output}}", script.display());
        let (_root, app) = test_app(&template);
        let segment = write_segment(&app, "segment_000005.wav");

        analyze_segment(&app, &segment);

        assert!(!segment.exists());
        let latest = read_latest(&app);
        assert_eq!(latest["status"], "error");
        assert_eq!(latest["status_message"], "no model");
        assert!(app.store.read_log(None).is_empty());
    }
}
