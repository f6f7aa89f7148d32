//! Capture supervisor: owns the ffmpeg child that writes segment files.

mod command;
mod reap;

pub use command::{
    AudioInput, CaptureCommand, build_capture_command, list_audio_inputs, parse_device_listing,
    resolve_ffmpeg_path,
};
pub use reap::{cleanup_capture_processes, list_ffmpeg_processes, segment_marker};

use std::collections::HashSet;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{info, warn};

use crate::constants::{
    STALL_LOG_INTERVAL, STALL_RESET_THRESHOLD, TERMINATE_GRACE, WORKER_CHECK_INTERVAL,
};
use crate::segments::{clear_segment_files, latest_segment_mtime};
use crate::snapshot::{Status, build_payload, write_latest};
use crate::state::App;

/// Sleep in short steps so a stop request is honored promptly.
fn sleep_interruptible(app: &App, total: Duration) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !app.should_stop() {
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(unix)]
fn terminate_child(child: &Child) {
    #[allow(clippy::cast_possible_wrap)]
    unsafe {
        let _ = libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &Child) {
    let _ = child;
}

/// TERM, bounded wait, KILL, bounded wait.
fn shutdown_child(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    terminate_child(child);
    if wait_with_grace(child) {
        return;
    }
    let _ = child.kill();
    let _ = wait_with_grace(child);
}

fn wait_with_grace(child: &mut Child) -> bool {
    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    false
}

/// Clear the segment directory, logging how many files went away.
fn clear_tmp_segments(app: &App, reason: &str) {
    let removed = clear_segment_files(&app.paths.tmp_dir);
    if removed > 0 {
        app.store.log_event(
            "server",
            &format!("Cleared {removed} pending segments ({reason})"),
        );
    }
}

/// Publish a status snapshot, logging the message once per change.
fn publish_status(
    app: &App,
    settings: &crate::config::Settings,
    status: Status,
    message: &str,
    event_kind: &str,
    last_status: &mut Option<String>,
) {
    let payload = build_payload(app, settings, status, message, &[]);
    if last_status.as_deref() != Some(message) {
        app.store.log_event(event_kind, message);
        *last_status = Some(message.to_string());
    }
    write_latest(app, payload);
}

/// Run the capture supervisor until a stop is requested.
///
/// One loop iteration launches one ffmpeg child and babysits it: the
/// restart signal, the stall watchdog, and child exit all funnel into a
/// TERM/KILL shutdown followed by relaunch or idle retry.
pub fn capture_loop(app: &Arc<App>) {
    let mut last_status: Option<String> = None;
    let mut last_restart_log: Option<Instant> = None;
    let mut stall_count: u32 = 0;

    cleanup_capture_processes(app, "startup", &HashSet::new());
    spawn_watchdog(app);

    while !app.should_stop() {
        let settings = app.config.snapshot();
        let Some(ffmpeg_path) = resolve_ffmpeg_path() else {
            let message = "ffmpeg not found";
            let payload = build_payload(app, &settings, Status::Error, message, &[]);
            if last_status.as_deref() != Some(message) {
                app.store.log_event("error", message);
                last_status = Some(message.to_string());
            }
            write_latest(app, payload);
            return;
        };

        let argv = match build_capture_command(&settings, &ffmpeg_path, &app.paths.tmp_dir) {
            CaptureCommand::Ready(argv) => argv,
            CaptureCommand::Misconfigured(reason) => {
                publish_status(
                    app,
                    &settings,
                    Status::Idle,
                    reason,
                    "server",
                    &mut last_status,
                );
                let _ = app.config.take_restart_signal();
                sleep_interruptible(app, Duration::from_secs(1));
                continue;
            }
        };

        publish_status(
            app,
            &settings,
            Status::Listening,
            "Listening",
            "server",
            &mut last_status,
        );

        let mut child = match spawn_capture_child(&argv) {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to launch capture child: {e}");
                app.store
                    .log_event("error", &format!("Capture launch failed: {e}"));
                sleep_interruptible(app, Duration::from_secs(2));
                continue;
            }
        };
        info!("capture child started (pid {})", child.id());
        app.set_capture_pid(Some(child.id()));

        let mut last_segment_time =
            latest_segment_mtime(&app.paths.tmp_dir).unwrap_or_else(SystemTime::now);
        let stall_timeout =
            Duration::from_secs_f64((settings.segment_seconds * 5.0).max(10.0));
        let mut restart_requested = false;

        while !app.should_stop() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                break;
            }
            if app.config.take_restart_signal() {
                restart_requested = true;
                terminate_child(&child);
                break;
            }
            if let Some(latest) = latest_segment_mtime(&app.paths.tmp_dir) {
                if latest > last_segment_time {
                    last_segment_time = latest;
                    stall_count = 0;
                }
            }
            let stalled = SystemTime::now()
                .duration_since(last_segment_time)
                .is_ok_and(|idle| idle > stall_timeout);
            if stalled {
                let should_log = last_restart_log
                    .is_none_or(|previous| previous.elapsed() > STALL_LOG_INTERVAL);
                if should_log {
                    app.store.log_event(
                        "server",
                        &format!(
                            "No new audio segments for {}s, restarting capture",
                            stall_timeout.as_secs()
                        ),
                    );
                    last_restart_log = Some(Instant::now());
                }
                clear_tmp_segments(app, "stall");
                stall_count += 1;
                if stall_count >= STALL_RESET_THRESHOLD {
                    app.store
                        .log_event("server", "Repeated stalls detected, forcing capture reset");
                    let allowed = HashSet::from([child.id()]);
                    cleanup_capture_processes(app, "stall reset", &allowed);
                    stall_count = 0;
                }
                restart_requested = true;
                terminate_child(&child);
                break;
            }
            std::thread::sleep(Duration::from_millis(500));
        }

        shutdown_child(&mut child);
        app.set_capture_pid(None);

        if app.should_stop() {
            break;
        }
        if restart_requested {
            continue;
        }

        publish_status(
            app,
            &settings,
            Status::Idle,
            "Input disconnected, retrying",
            "server",
            &mut last_status,
        );
        sleep_interruptible(app, Duration::from_secs(2));
    }
}

fn spawn_capture_child(argv: &[String]) -> std::io::Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty capture command"))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
}

/// Reap strays every watchdog tick while a child is supposed to be running.
fn spawn_watchdog(app: &Arc<App>) {
    let app = Arc::clone(app);
    std::thread::Builder::new()
        .name("capture-watchdog".to_string())
        .spawn(move || {
            while !app.should_stop() {
                if let Some(pid) = app.capture_pid() {
                    cleanup_capture_processes(&app, "watchdog", &HashSet::from([pid]));
                }
                sleep_interruptible(&app, WORKER_CHECK_INTERVAL);
            }
        })
        .map(|_| ())
        .unwrap_or_else(|e| warn!("failed to spawn capture watchdog: {e}"));
}
