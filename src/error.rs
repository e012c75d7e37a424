//! Error types for the warden daemon.

/// Top-level error type for the automation process.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Configuration load or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Persistent blacklist store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Chat-platform transport error.
    #[error("platform error: {0}")]
    Platform(String),

    /// Fatal boot-sequence error; the process never reached readiness.
    #[error("boot error: {0}")]
    Boot(String),

    /// Event queue send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WardenError>;

impl From<rusqlite::Error> for WardenError {
    fn from(err: rusqlite::Error) -> Self {
        WardenError::Storage(err.to_string())
    }
}
