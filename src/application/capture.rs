//! Short-lived utility operations: connectivity probe and single-frame
//! snapshot. Neither touches the registries; both carry a hard timeout and
//! never leave their process behind.

use crate::adapters::ffmpeg::FfmpegPlanner;
use crate::config::Config;
use crate::error::{MediaError, MediaResult};
use crate::ports::process::{ProcessHandle, ProcessPort};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

/// A decodable elementary stream announced on ffmpeg's diagnostics, e.g.
/// `  Stream #0:0: Video: h264 (Main), yuv420p, 1920x1080`.
static STREAM_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Stream #\d+:\d+.*: (Video|Audio)").unwrap());

pub struct CaptureService<P> {
    port: Arc<P>,
    planner: FfmpegPlanner,
}

impl<P: ProcessPort> CaptureService<P> {
    pub fn new(config: &Config, port: Arc<P>) -> Self {
        Self {
            port,
            planner: FfmpegPlanner::new(config.ffmpeg_bin.clone()),
        }
    }

    /// Check whether `source_uri` answers with decodable media within
    /// `timeout`. Always resolves within the bound and always terminates
    /// the probe process before returning.
    pub async fn probe(&self, source_uri: &str, timeout: Duration) -> bool {
        let plan = self.planner.probe(source_uri);
        let mut process = match self.port.spawn(plan).await {
            Ok(process) => process,
            Err(err) => {
                tracing::warn!(source = %source_uri, "probe spawn failed: {err}");
                return false;
            }
        };

        let found = tokio::time::timeout(timeout, async {
            loop {
                tokio::select! {
                    Some(line) = process.stderr.recv() => {
                        if STREAM_MARKER.is_match(&line) {
                            break true;
                        }
                    }
                    exit = &mut process.exit => {
                        let _ = exit;
                        break false;
                    }
                }
            }
        })
        .await
        .unwrap_or(false);

        process.control.kill();
        found
    }

    /// Extract one frame from `source_uri` into `output`. Rejects on spawn
    /// error, nonzero exit, timeout, or a missing output file; the process
    /// is terminated before any rejection.
    pub async fn snapshot(
        &self,
        source_uri: &str,
        output: &Path,
        timeout: Duration,
    ) -> MediaResult<PathBuf> {
        let plan = self.planner.snapshot(source_uri, output);
        let ProcessHandle {
            control,
            stderr,
            exit,
        } = self.port.spawn(plan).await?;
        // The adapter keeps draining diagnostics; a snapshot only cares
        // about the exit.
        drop(stderr);
        let mut exit = exit;

        let exit = match tokio::time::timeout(timeout, &mut exit).await {
            Err(_) => {
                control.kill();
                return Err(MediaError::Timeout {
                    what: "snapshot",
                    timeout,
                });
            }
            Ok(Err(_)) => {
                control.kill();
                return Err(MediaError::ProcessFailed { code: None });
            }
            Ok(Ok(exit)) => exit,
        };

        if !exit.success() {
            return Err(MediaError::ProcessFailed { code: exit.code });
        }
        // Exit code 0 is no proof the frame landed on disk.
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(MediaError::SnapshotMissing(output.to_path_buf()));
        }
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::process::{MockProcessPort, ProcessControl, ProcessExit, TermSignal};
    use std::time::Instant;
    use tempfile::tempdir;
    use tokio::sync::{mpsc, oneshot};

    fn test_config() -> Config {
        Config {
            addr: String::from("127.0.0.1"),
            port: String::from("0"),
            media_dir: PathBuf::from("/tmp"),
            ffmpeg_bin: String::from("ffmpeg"),
            startup_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_millis(500),
            cleanup_delay: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(1),
        }
    }

    struct FakeProcess {
        signals: mpsc::UnboundedReceiver<TermSignal>,
        stderr_tx: mpsc::Sender<String>,
        exit_tx: oneshot::Sender<ProcessExit>,
    }

    fn fake_process(pid: u32) -> (ProcessHandle, FakeProcess) {
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::channel(16);
        let (exit_tx, exit_rx) = oneshot::channel();
        let handle = ProcessHandle::new(
            ProcessControl::new(Some(pid), signal_tx),
            stderr_rx,
            exit_rx,
        );
        (
            handle,
            FakeProcess {
                signals,
                stderr_tx,
                exit_tx,
            },
        )
    }

    fn service_with(port: MockProcessPort) -> CaptureService<MockProcessPort> {
        CaptureService::new(&test_config(), Arc::new(port))
    }

    #[tokio::test]
    async fn test_probe_detects_stream_marker() {
        let (handle, fake) = fake_process(3);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        let FakeProcess {
            mut signals,
            stderr_tx,
            exit_tx: _exit_tx,
        } = fake;
        tokio::spawn(async move {
            let _ = stderr_tx
                .send(String::from("Input #0, rtsp, from 'rtsp://cam/feed':"))
                .await;
            let _ = stderr_tx
                .send(String::from(
                    "  Stream #0:0(und): Video: h264 (Main), yuv420p, 1920x1080",
                ))
                .await;
        });

        assert!(service.probe("rtsp://cam/feed", Duration::from_secs(1)).await);
        // The probe process never outlives the call.
        assert_eq!(signals.recv().await, Some(TermSignal::Force));
    }

    #[tokio::test]
    async fn test_probe_false_when_process_exits_without_streams() {
        let (handle, fake) = fake_process(3);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        fake.exit_tx.send(ProcessExit { code: Some(1) }).unwrap();
        assert!(!service.probe("rtsp://cam/feed", Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_returns_within_timeout() {
        let (handle, fake) = fake_process(3);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        // Source never answers: no stderr, no exit.
        let started = Instant::now();
        let accessible = service
            .probe("rtsp://dead/feed", Duration::from_millis(100))
            .await;
        assert!(!accessible);
        assert!(started.elapsed() < Duration::from_secs(1));

        let FakeProcess { mut signals, .. } = fake;
        assert_eq!(signals.recv().await, Some(TermSignal::Force));
    }

    #[tokio::test]
    async fn test_probe_false_on_spawn_error() {
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).returning(|plan| {
            Err(MediaError::Spawn {
                program: plan.program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no ffmpeg"),
            })
        });
        let service = service_with(port);
        assert!(!service.probe("rtsp://cam/feed", Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_snapshot_resolves_when_file_exists() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("shot.jpg");
        std::fs::write(&output, b"jpeg").unwrap();

        let (handle, fake) = fake_process(3);
        fake.exit_tx.send(ProcessExit { code: Some(0) }).unwrap();
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        let path = service
            .snapshot("rtsp://cam/feed", &output, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(path, output);
    }

    #[tokio::test]
    async fn test_snapshot_rejects_missing_file_even_on_clean_exit() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("shot.jpg");

        let (handle, fake) = fake_process(3);
        fake.exit_tx.send(ProcessExit { code: Some(0) }).unwrap();
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        let result = service
            .snapshot("rtsp://cam/feed", &output, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(MediaError::SnapshotMissing(_))));
    }

    #[tokio::test]
    async fn test_snapshot_rejects_nonzero_exit() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("shot.jpg");

        let (handle, fake) = fake_process(3);
        fake.exit_tx.send(ProcessExit { code: Some(1) }).unwrap();
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        let result = service
            .snapshot("rtsp://cam/feed", &output, Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(MediaError::ProcessFailed { code: Some(1) })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_times_out_and_kills() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("shot.jpg");

        let (handle, fake) = fake_process(3);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(port);

        let result = service
            .snapshot("rtsp://dead/feed", &output, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(MediaError::Timeout { .. })));

        let FakeProcess { mut signals, .. } = fake;
        assert_eq!(signals.recv().await, Some(TermSignal::Force));
    }
}
