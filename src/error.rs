use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced synchronously by manager operations.
///
/// Anything that happens after a process is spawned and registered travels
/// through lifecycle events and queryable session state instead.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("stream {id} did not become ready within {timeout:?}")]
    StartupTimeout { id: String, timeout: Duration },

    #[error("stream {id} exited before becoming ready")]
    StartupFailed { id: String },

    #[error("recording {0} is already active")]
    RecordingBusy(String),

    #[error("{what} timed out after {timeout:?}")]
    Timeout {
        what: &'static str,
        timeout: Duration,
    },

    #[error("process exited with code {code:?}")]
    ProcessFailed { code: Option<i32> },

    #[error("snapshot produced no output at {}", .0.display())]
    SnapshotMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using MediaError
pub type MediaResult<T> = Result<T, MediaError>;
