use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle notifications emitted by the manager for external
/// logging and alerting. Delivery order matches transition order for any
/// single id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MediaEvent {
    StreamStarted { id: String, playlist: PathBuf },
    StreamStopped { id: String },
    StreamErrored { id: String, code: Option<i32> },
    RecordingFinished {
        id: String,
        output: PathBuf,
        code: Option<i32>,
    },
    RecordingErrored {
        id: String,
        output: PathBuf,
        code: Option<i32>,
    },
}
