//! Configuration for the media lifecycle service.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded once at bootstrap and handed to the manager.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Root directory for stream, recording and snapshot artifacts
    pub media_dir: PathBuf,
    /// ffmpeg binary to spawn
    pub ffmpeg_bin: String,
    /// How long `acquire` waits for a stream's playlist to appear
    pub startup_timeout: Duration,
    /// Grace window between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
    /// Delay before a stopped stream's artifacts are removed
    pub cleanup_delay: Duration,
    /// Default bound for connectivity probes
    pub probe_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            media_dir: env::var("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./media")),
            ffmpeg_bin: env::var("FFMPEG_BIN").unwrap_or_else(|_| String::from("ffmpeg")),
            startup_timeout: secs_from_env("STREAM_STARTUP_TIMEOUT_SECS", 15),
            stop_grace: secs_from_env("STOP_GRACE_SECS", 5),
            cleanup_delay: secs_from_env("CLEANUP_DELAY_SECS", 30),
            probe_timeout: secs_from_env("PROBE_TIMEOUT_SECS", 10),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}
