//! Orphaned capture-process reaping.
//!
//! Candidates are matched by pid and by the segment-directory marker in
//! their command line, never by image name alone, so only children that
//! were writing into our working directory get killed.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::constants::{SEGMENT_PREFIX, TERMINATE_GRACE};
use crate::state::App;

/// List processes whose command line mentions ffmpeg, as `(pid, cmdline)`.
///
/// Uses `pgrep -fl`, falling back to `ps` where pgrep is unavailable.
#[must_use]
pub fn list_ffmpeg_processes() -> Vec<(u32, String)> {
    let listing = std::process::Command::new("pgrep")
        .args(["-fl", "ffmpeg"])
        .output()
        .or_else(|_| {
            std::process::Command::new("ps")
                .args(["-ax", "-o", "pid=,command="])
                .output()
        });
    let Ok(output) = listing else {
        return Vec::new();
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut processes = Vec::new();
    for line in stdout.lines() {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let (Some(pid_text), Some(command)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !command.contains("ffmpeg") {
            continue;
        }
        let Ok(pid) = pid_text.parse::<u32>() else {
            continue;
        };
        processes.push((pid, command.to_string()));
    }
    processes
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) {
    #[allow(clippy::cast_possible_wrap)]
    unsafe {
        let _ = libc::kill(pid as libc::pid_t, signal);
    }
}

#[cfg(unix)]
#[must_use]
fn pid_exists(pid: u32) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let alive = unsafe { libc::kill(pid as libc::pid_t, 0) };
    alive == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// TERM, then KILL after a bounded wait.
#[cfg(unix)]
fn terminate_pids(pids: &[u32]) {
    for &pid in pids {
        send_signal(pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + TERMINATE_GRACE;
    let mut remaining: Vec<u32> = pids.to_vec();
    while !remaining.is_empty() && Instant::now() < deadline {
        remaining.retain(|&pid| pid_exists(pid));
        if !remaining.is_empty() {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
    for pid in remaining {
        send_signal(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_pids(_pids: &[u32]) {}

/// The command-line marker identifying our capture children.
#[must_use]
pub fn segment_marker(tmp_dir: &Path) -> String {
    tmp_dir.join(SEGMENT_PREFIX).to_string_lossy().into_owned()
}

/// Kill stray capture processes writing into our segment directory.
///
/// `allowed` pids (the current child) are spared. Returns how many
/// candidates were signalled; a `server` event records the reap.
pub fn cleanup_capture_processes(app: &App, reason: &str, allowed: &HashSet<u32>) -> usize {
    let marker = segment_marker(&app.paths.tmp_dir);
    let candidates: Vec<u32> = list_ffmpeg_processes()
        .into_iter()
        .filter(|(pid, command)| command.contains(&marker) && !allowed.contains(pid))
        .map(|(pid, _)| pid)
        .collect();
    if candidates.is_empty() {
        return 0;
    }
    debug!("reaping {} stray capture process(es): {reason}", candidates.len());
    terminate_pids(&candidates);
    app.store.log_event(
        "server",
        &format!(
            "Cleaned {} orphan capture process(es) ({reason})",
            candidates.len()
        ),
    );
    candidates.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_marker_includes_prefix() {
        let marker = segment_marker(Path::new("/srv/overlay/tmp"));
        assert_eq!(marker, "/srv/overlay/tmp/segment_");
    }

    #[test]
    fn test_list_ffmpeg_processes_tolerates_missing_tools() {
        // Just exercises the listing path; there is usually no ffmpeg in CI.
        let processes = list_ffmpeg_processes();
        for (_pid, command) in processes {
            assert!(command.contains("ffmpeg"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_exists_for_self() {
        assert!(pid_exists(std::process::id()));
    }
}
