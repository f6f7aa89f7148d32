//! Shared pipeline state.
//!
//! One `App` value owns every cross-component cell with its lock
//! encapsulated, and is passed by `Arc` into the capture loop, the worker
//! pools, and the HTTP surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clips::ClipArchive;
use crate::config::ConfigStore;
use crate::error::Result;
use crate::paths::ProjectPaths;
use crate::snapshot::LastDetection;
use crate::store::Store;

/// Shared state for one pipeline instance.
pub struct App {
    /// Filesystem layout.
    pub paths: ProjectPaths,
    /// Live settings.
    pub config: ConfigStore,
    /// Durable store.
    pub store: Store,
    /// Best-clip archive.
    pub clips: ClipArchive,
    /// Guards the write-temp-then-rename sequence for the snapshot file.
    pub latest_lock: Mutex<()>,
    last_detection: Mutex<Option<LastDetection>>,
    last_analysis_error: Mutex<Option<String>>,
    capture_pid: Mutex<Option<u32>>,
    stop: AtomicBool,
}

impl App {
    /// Assemble the pipeline state under a project root.
    pub fn open(root: &std::path::Path) -> Result<Arc<Self>> {
        let paths = ProjectPaths::new(root);
        paths.ensure_directories()?;
        let config = ConfigStore::load(&paths)?;
        let store = Store::open(&paths)?;
        let clips = ClipArchive::open(&paths)?;
        Ok(Arc::new(Self {
            paths,
            config,
            store,
            clips,
            latest_lock: Mutex::new(()),
            last_detection: Mutex::new(None),
            last_analysis_error: Mutex::new(None),
            capture_pid: Mutex::new(None),
            stop: AtomicBool::new(false),
        }))
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request an orderly stop of every loop.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Record the pid of the running capture child.
    pub fn set_capture_pid(&self, pid: Option<u32>) {
        *Self::lock(&self.capture_pid) = pid;
    }

    /// Pid of the running capture child, if any.
    #[must_use]
    pub fn capture_pid(&self) -> Option<u32> {
        *Self::lock(&self.capture_pid)
    }

    /// Most recent recorded detection.
    #[must_use]
    pub fn last_detection(&self) -> Option<LastDetection> {
        Self::lock(&self.last_detection).clone()
    }

    /// Replace the most recent detection record.
    pub fn set_last_detection(&self, value: Option<LastDetection>) {
        *Self::lock(&self.last_detection) = value;
    }

    /// Emit an `error` event unless it repeats the previous analysis error.
    ///
    /// The snapshot still reflects the error either way; only the event log
    /// is deduplicated.
    pub fn log_analysis_error_deduped(&self, message: &str) {
        let mut last = Self::lock(&self.last_analysis_error);
        if last.as_deref() != Some(message) {
            self.store.log_event("error", message);
            *last = Some(message.to_string());
        }
    }

    /// Clear the analysis-error dedup cell after a successful run.
    pub fn clear_analysis_error(&self) {
        *Self::lock(&self.last_analysis_error) = None;
    }
}
