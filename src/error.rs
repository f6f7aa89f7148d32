//! Error types for featherfront.

/// Result type alias for featherfront operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for featherfront.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read settings file.
    #[error("failed to read settings file '{path}'")]
    SettingsRead {
        /// Path to the settings file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse settings file.
    #[error("failed to parse settings file '{path}'")]
    SettingsParse {
        /// Path to the settings file.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to write settings file.
    #[error("failed to write settings file '{path}'")]
    SettingsWrite {
        /// Path to the settings file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Database operation failed.
    #[error("database error")]
    Database(#[from] rusqlite::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// Classifier template is malformed.
    #[error("{message}")]
    Template {
        /// Description of the template problem.
        message: String,
    },

    /// Classifier invocation failed.
    #[error("{message}")]
    Classifier {
        /// Operator-facing failure message.
        message: String,
    },

    /// HTTP listener could not be started.
    #[error("failed to bind HTTP listener on port {port}")]
    HttpBind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
