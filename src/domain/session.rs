use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a live stream session.
///
/// Transitions only move forward; a terminal state never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl StreamStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamStatus::Stopped | StreamStatus::Failed)
    }

    fn can_advance_to(self, next: StreamStatus) -> bool {
        match self {
            StreamStatus::Starting => next != StreamStatus::Starting,
            StreamStatus::Running => next.is_terminal(),
            StreamStatus::Stopped | StreamStatus::Failed => false,
        }
    }
}

/// One shared live transcode, keyed by stream id.
///
/// Pure state record: process handles live in a side table keyed by the
/// same id, so inspecting a session never touches a live OS resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: String,
    pub source_uri: String,
    pub status: StreamStatus,
    pub started_at: DateTime<Utc>,
    /// Playlist path, set once the artifact is confirmed on disk.
    pub playlist: Option<PathBuf>,
    /// Count of concurrent consumers sharing this transcode.
    pub viewers: u32,
}

impl StreamSession {
    pub fn new(id: &str, source_uri: &str) -> Self {
        Self {
            id: id.to_string(),
            source_uri: source_uri.to_string(),
            status: StreamStatus::Starting,
            started_at: Utc::now(),
            playlist: None,
            viewers: 1,
        }
    }

    /// Apply a forward transition. Returns false (and leaves the session
    /// untouched) when `next` would move backwards.
    pub fn advance(&mut self, next: StreamStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// One exclusive capture, keyed by recording id. No viewer concept: a
/// second start for an active id is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingJob {
    pub id: String,
    pub source_uri: String,
    pub output_path: PathBuf,
    pub duration_secs: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl RecordingJob {
    pub fn new(id: &str, source_uri: &str, output_path: PathBuf, duration_secs: Option<u64>) -> Self {
        Self {
            id: id.to_string(),
            source_uri: source_uri.to_string(),
            output_path,
            duration_secs,
            started_at: Utc::now(),
        }
    }
}

/// Encoding parameters for a live transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    pub video_codec: String,
    pub preset: String,
    /// e.g. "1280x720"
    pub resolution: Option<String>,
    /// e.g. "1500k"
    pub video_bitrate: Option<String>,
    pub framerate: Option<u32>,
    pub segment_seconds: u32,
    pub playlist_size: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            video_codec: String::from("libx264"),
            preset: String::from("veryfast"),
            resolution: None,
            video_bitrate: None,
            framerate: None,
            segment_seconds: 2,
            playlist_size: 10,
        }
    }
}
