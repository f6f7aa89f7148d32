//! Application-wide constants.
//!
//! All pipeline tunables and fixed strings are defined here to ensure
//! consistency and make changes easy to track.

use std::time::Duration;

/// Application name used for user-facing messages.
pub const APP_NAME: &str = "featherfront";

/// Confidence floor passed to the classifier itself.
///
/// The classifier is asked for everything above this so near-misses can be
/// surfaced; the user-facing threshold is applied when partitioning results.
pub const ANALYSIS_MIN_CONF: f64 = 0.01;

/// Number of silence-gate workers.
pub const GATE_WORKERS: usize = 1;

/// Number of classifier workers.
pub const ANALYSIS_WORKERS: usize = 3;

/// Maximum analysis backlog (queued + in flight) before the gate drops
/// active segments instead of forwarding them.
pub const MAX_ANALYSIS_BACKLOG: usize = 24;

/// Maximum number of segment files kept in the working directory.
pub const MAX_QUEUE_SEGMENTS: usize = 60;

/// Segments older than this are evicted unless a worker holds them.
pub const MAX_SEGMENT_AGE: Duration = Duration::from_secs(30);

/// A segment is considered fully written once its mtime is at least this old.
pub const SEGMENT_READY_AGE: Duration = Duration::from_millis(400);

/// Dispatcher reconciliation interval.
pub const DISPATCH_INTERVAL: Duration = Duration::from_millis(200);

/// Minimum spacing between repeated drop events of the same cause.
pub const DROP_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Worker liveness check interval.
pub const WORKER_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Hard timeout for a single classifier invocation.
pub const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between TERM and KILL for supervised children.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Minimum spacing between stall-restart events.
pub const STALL_LOG_INTERVAL: Duration = Duration::from_secs(15);

/// Consecutive stalls before a full orphan reap.
pub const STALL_RESET_THRESHOLD: u32 = 3;

/// Filename prefix for in-flight segments.
pub const SEGMENT_PREFIX: &str = "segment_";

/// Capture output pattern handed to ffmpeg.
pub const SEGMENT_PATTERN: &str = "segment_%06d.wav";

/// Locations probed for ffmpeg when it is not on `PATH`.
pub const FALLBACK_FFMPEG_PATHS: &[&str] = &["/opt/homebrew/bin/ffmpeg", "/usr/local/bin/ffmpeg"];

/// Suffix the classifier appends when writing into an output directory.
pub const CLASSIFIER_RESULT_SUFFIX: &str = ".BirdNET.results.csv";

/// Calendar constants for the 48-week detection calendar.
pub mod calendar {
    /// Number of weeks in the detection calendar.
    pub const WEEKS_PER_YEAR: u32 = 48;
    /// Days per calendar week used for week derivation.
    pub const DAYS_PER_WEEK: u32 = 7;
}

/// HTTP query bounds.
pub mod http {
    /// Default number of rows returned by list endpoints.
    pub const DEFAULT_LIMIT: usize = 200;
    /// Maximum number of rows a client may request.
    pub const MAX_LIMIT: usize = 1000;
    /// Default activity window in days.
    pub const DEFAULT_ACTIVITY_DAYS: i64 = 7;
    /// Maximum activity window in days.
    pub const MAX_ACTIVITY_DAYS: i64 = 30;
    /// Basic-auth realm presented on 401 responses.
    pub const AUTH_REALM: &str = "Feather Front Settings";
}
