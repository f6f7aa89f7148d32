//! Silence-gate worker: drop near-silent segments before classification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{Activity, analyze_activity};
use crate::constants::{DROP_LOG_INTERVAL, MAX_ANALYSIS_BACKLOG};
use crate::pipeline::PipelineShared;
use crate::segments::is_file_ready;
use crate::state::App;

/// Run one silence-gate worker until a stop is requested.
pub fn gate_worker(app: &Arc<App>, shared: &Arc<PipelineShared>, worker_id: usize) {
    while !app.should_stop() {
        let Ok(path) = shared.gate_rx.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        shared.inflight().gate.remove(&path);

        if !path.exists() {
            continue;
        }
        // Not settled yet; the dispatcher will offer it again.
        if !is_file_ready(&path) {
            continue;
        }

        let settings = app.config.snapshot();
        match analyze_activity(
            &path,
            settings.silence_threshold_db,
            settings.silence_min_seconds,
        ) {
            Activity::Silent { peak_db } => {
                let message = match peak_db {
                    Some(peak) => format!("Skipped silent segment (peak {peak:.1} dBFS)"),
                    None => format!(
                        "Skipped silent segment (below {:.1} dBFS)",
                        settings.silence_threshold_db
                    ),
                };
                app.store.log_event("analysis", &message);
                let _ = std::fs::remove_file(&path);
            }
            Activity::Active => {
                let backlog = shared.analysis_backlog();
                if backlog >= MAX_ANALYSIS_BACKLOG {
                    let mut drop_log = shared.drop_log();
                    let should_log = drop_log
                        .backlog
                        .is_none_or(|last| last.elapsed() > DROP_LOG_INTERVAL);
                    if should_log {
                        drop_log.backlog = Some(Instant::now());
                        drop(drop_log);
                        app.store.log_event(
                            "analysis",
                            &format!("Dropped active segment due to backlog ({backlog})"),
                        );
                    }
                    let _ = std::fs::remove_file(&path);
                    continue;
                }
                shared.inflight().analysis.insert(path.clone());
                if shared.analysis_tx.send(path).is_err() {
                    tracing::warn!("gate worker {worker_id}: analysis queue closed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audio::testwav::{tone_then_silence, write_mono_i16};
    use crate::constants::SEGMENT_READY_AGE;
    use std::path::PathBuf;

    fn ready(path: &PathBuf) {
        // Backdate by waiting out the settle age.
        while !is_file_ready(path) {
            std::thread::sleep(SEGMENT_READY_AGE / 4);
        }
    }

    /// Run a worker thread to completion; the caller arranges the stop.
    fn run_one(app: &Arc<App>, shared: &Arc<PipelineShared>) {
        let worker_app = Arc::clone(app);
        let worker_shared = Arc::clone(shared);
        let handle = std::thread::spawn(move || gate_worker(&worker_app, &worker_shared, 1));
        let _ = handle.join();
    }

    #[test]
    #[serial_test::serial]
    fn test_silent_segment_dropped_with_event() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(dir.path()).unwrap();
        let shared = PipelineShared::new();

        let path = app.paths.tmp_dir.join("segment_000001.wav");
        write_mono_i16(&path, 48_000, &vec![0i16; 48_000 * 3]);
        ready(&path);
        shared.inflight().gate.insert(path.clone());
        shared.gate_tx.send(path.clone()).unwrap();

        let stopper = Arc::clone(&app);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(700));
            stopper.request_stop();
        });
        run_one(&app, &shared);

        assert!(!path.exists());
        let events = app.store.read_events(None);
        assert!(
            events
                .iter()
                .any(|event| event.kind == "analysis"
                    && event.message.contains("Skipped silent segment"))
        );
        assert_eq!(shared.analysis_rx.len(), 0);
    }

    #[test]
    #[serial_test::serial]
    fn test_active_segment_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(dir.path()).unwrap();
        let shared = PipelineShared::new();

        let path = app.paths.tmp_dir.join("segment_000002.wav");
        let samples = tone_then_silence(48_000, 1.0, 0.5, 0.5);
        write_mono_i16(&path, 48_000, &samples);
        ready(&path);
        shared.inflight().gate.insert(path.clone());
        shared.gate_tx.send(path.clone()).unwrap();

        let stopper = Arc::clone(&app);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(700));
            stopper.request_stop();
        });
        run_one(&app, &shared);

        assert!(path.exists());
        assert_eq!(shared.analysis_rx.len(), 1);
        assert!(shared.inflight().analysis.contains(&path));
        assert!(!shared.inflight().gate.contains(&path));
    }

    #[test]
    #[serial_test::serial]
    fn test_backlog_drop_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(dir.path()).unwrap();
        let shared = PipelineShared::new();

        // Saturate the analysis backlog with placeholder paths.
        {
            let mut inflight = shared.inflight();
            for i in 0..MAX_ANALYSIS_BACKLOG {
                inflight
                    .analysis
                    .insert(app.paths.tmp_dir.join(format!("segment_{i:06}.bak")));
            }
        }

        let samples = tone_then_silence(48_000, 1.0, 0.0, 0.5);
        for name in ["segment_100001.wav", "segment_100002.wav"] {
            let path = app.paths.tmp_dir.join(name);
            write_mono_i16(&path, 48_000, &samples);
            ready(&path);
            shared.inflight().gate.insert(path.clone());
            shared.gate_tx.send(path).unwrap();
        }

        let stopper = Arc::clone(&app);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(700));
            stopper.request_stop();
        });
        run_one(&app, &shared);

        // Both dropped, but only one backlog event within the window.
        assert!(!app.paths.tmp_dir.join("segment_100001.wav").exists());
        assert!(!app.paths.tmp_dir.join("segment_100002.wav").exists());
        let backlog_events: Vec<_> = app
            .store
            .read_events(None)
            .into_iter()
            .filter(|event| event.message.contains("backlog"))
            .collect();
        assert_eq!(backlog_events.len(), 1);
    }
}
