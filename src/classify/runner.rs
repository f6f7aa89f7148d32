//! Bounded-time subprocess execution for classifier invocations.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

/// How a classifier invocation ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The child exited on its own.
    Completed {
        /// Whether the exit status was zero.
        success: bool,
        /// Captured stderr.
        stderr: String,
    },
    /// The executable was not found.
    NotFound,
    /// The child exceeded the timeout and was killed.
    TimedOut,
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<()>> {
    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(Some(()));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Run `argv` with stdout/stderr captured and a hard timeout.
///
/// Stdout is drained and discarded; the output CSV is the interface. The
/// child is killed (and reaped) on timeout.
#[must_use]
pub fn run_command(argv: &[String], workdir: Option<&Path>, timeout: Duration) -> RunOutcome {
    let Some((program, args)) = argv.split_first() else {
        return RunOutcome::NotFound;
    };
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = workdir.filter(|d| !d.as_os_str().is_empty()) {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RunOutcome::NotFound,
        Err(e) => {
            return RunOutcome::Completed {
                success: false,
                stderr: e.to_string(),
            };
        }
    };

    let stdout_handle = drain_pipe(child.stdout.take());
    let stderr_handle = drain_pipe(child.stderr.take());

    let waited = wait_with_timeout(&mut child, timeout);
    if !matches!(waited, Ok(Some(()))) {
        debug!("classifier timed out after {:?}, killing", timeout);
        let _ = child.kill();
        let _ = child.wait();
        let _ = stdout_handle.join();
        let _ = stderr_handle.join();
        return RunOutcome::TimedOut;
    }

    let status = match child.wait() {
        Ok(status) => status,
        Err(e) => {
            return RunOutcome::Completed {
                success: false,
                stderr: e.to_string(),
            };
        }
    };
    let _ = stdout_handle.join();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    RunOutcome::Completed {
        success: status.success(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
    }
}
