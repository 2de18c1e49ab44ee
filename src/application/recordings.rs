//! Exclusive recording lifecycle.
//!
//! Recordings are not shared: one active job per id, rejected otherwise.
//! The registry entry lives exactly as long as the process; the watcher
//! removes it on exit and emits the terminal notification.

use crate::adapters::events::EventHub;
use crate::adapters::ffmpeg::FfmpegPlanner;
use crate::config::Config;
use crate::domain::events::MediaEvent;
use crate::domain::session::RecordingJob;
use crate::error::{MediaError, MediaResult};
use crate::ports::process::{ProcessControl, ProcessExit, ProcessHandle, ProcessPort};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

#[derive(Clone)]
pub(crate) struct RecordingHandle {
    control: ProcessControl,
    stop_requested: Arc<AtomicBool>,
    done_rx: watch::Receiver<bool>,
}

#[derive(Default)]
pub(crate) struct RecordingRegistry {
    jobs: HashMap<String, RecordingJob>,
    handles: HashMap<String, RecordingHandle>,
}

pub struct RecordingService<P> {
    port: Arc<P>,
    planner: FfmpegPlanner,
    hub: Arc<EventHub>,
    media_dir: PathBuf,
    stop_grace: Duration,
    registry: Arc<Mutex<RecordingRegistry>>,
}

impl<P: ProcessPort> RecordingService<P> {
    pub fn new(config: &Config, port: Arc<P>, hub: Arc<EventHub>) -> Self {
        Self {
            port,
            planner: FfmpegPlanner::new(config.ffmpeg_bin.clone()),
            hub,
            media_dir: config.media_dir.clone(),
            stop_grace: config.stop_grace,
            registry: Arc::new(Mutex::new(RecordingRegistry::default())),
        }
    }

    /// Start an exclusive recording. Fails immediately with
    /// `RecordingBusy` while a job for `id` is in flight.
    pub async fn start(
        &self,
        id: &str,
        source_uri: &str,
        output_path: Option<PathBuf>,
        duration: Option<Duration>,
    ) -> MediaResult<PathBuf> {
        let output = output_path.unwrap_or_else(|| {
            self.media_dir.join("recordings").join(format!("{id}.mp4"))
        });

        let mut registry = self.registry.lock().await;
        if registry.jobs.contains_key(id) {
            return Err(MediaError::RecordingBusy(id.to_string()));
        }

        let plan = self.planner.record(source_uri, &output, duration);
        let process = self.port.spawn(plan).await?;

        let (done_tx, done_rx) = watch::channel(false);
        let stop_requested = Arc::new(AtomicBool::new(false));
        registry.jobs.insert(
            id.to_string(),
            RecordingJob::new(id, source_uri, output.clone(), duration.map(|d| d.as_secs())),
        );
        registry.handles.insert(
            id.to_string(),
            RecordingHandle {
                control: process.control.clone(),
                stop_requested: Arc::clone(&stop_requested),
                done_rx,
            },
        );

        tokio::spawn(watch_recording(
            id.to_string(),
            output.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.hub),
            stop_requested,
            done_tx,
            process,
        ));

        Ok(output)
    }

    /// Graceful-then-forced stop. Returns whether an active recording was
    /// found and signaled.
    pub async fn stop(&self, id: &str) -> bool {
        let handle = { self.registry.lock().await.handles.get(id).cloned() };
        let Some(handle) = handle else {
            return false;
        };

        handle.stop_requested.store(true, Ordering::SeqCst);
        handle.control.terminate();

        let mut done_rx = handle.done_rx;
        let exited = tokio::time::timeout(self.stop_grace, done_rx.wait_for(|done| *done)).await;
        if exited.is_err() {
            handle.control.kill();
        }
        true
    }

    pub async fn get_job(&self, id: &str) -> Option<RecordingJob> {
        self.registry.lock().await.jobs.get(id).cloned()
    }

    pub(crate) async fn active_ids(&self) -> Vec<String> {
        self.registry.lock().await.jobs.keys().cloned().collect()
    }
}

async fn watch_recording(
    id: String,
    output: PathBuf,
    registry: Arc<Mutex<RecordingRegistry>>,
    hub: Arc<EventHub>,
    stop_requested: Arc<AtomicBool>,
    done_tx: watch::Sender<bool>,
    mut process: ProcessHandle,
) {
    let exit = loop {
        tokio::select! {
            Some(line) = process.stderr.recv() => {
                tracing::debug!(target: "ffmpeg", recording = %id, "{line}");
            }
            exit = &mut process.exit => {
                break exit.unwrap_or(ProcessExit { code: None });
            }
        }
    };

    {
        let mut registry = registry.lock().await;
        registry.jobs.remove(&id);
        registry.handles.remove(&id);
    }

    let requested = stop_requested.load(Ordering::SeqCst);
    if exit.success() || requested {
        tracing::info!(recording = %id, "recording finished");
        let _ = hub.publish(MediaEvent::RecordingFinished {
            id: id.clone(),
            output,
            code: exit.code,
        });
    } else {
        tracing::warn!(recording = %id, code = ?exit.code, "recording process failed");
        let _ = hub.publish(MediaEvent::RecordingErrored {
            id: id.clone(),
            output,
            code: exit.code,
        });
    }
    let _ = done_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::process::{MockProcessPort, TermSignal};
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::sync::{mpsc, oneshot};

    fn test_config(media_dir: &Path) -> Config {
        Config {
            addr: String::from("127.0.0.1"),
            port: String::from("0"),
            media_dir: media_dir.to_path_buf(),
            ffmpeg_bin: String::from("ffmpeg"),
            startup_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_millis(500),
            cleanup_delay: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(1),
        }
    }

    struct FakeProcess {
        signals: mpsc::UnboundedReceiver<TermSignal>,
        #[allow(dead_code)]
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

    fn service_with(
        config: &Config,
        port: MockProcessPort,
        hub: Arc<EventHub>,
    ) -> RecordingService<MockProcessPort> {
        RecordingService::new(config, Arc::new(port), hub)
    }

    #[tokio::test]
    async fn test_second_start_for_active_id_is_rejected() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let (handle, _fake) = fake_process(9);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));
        let service = service_with(&config, port, Arc::new(EventHub::new()));

        service
            .start("r1", "rtsp://cam/feed", None, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let second = service
            .start("r1", "rtsp://cam/feed", None, Some(Duration::from_secs(5)))
            .await;
        assert!(matches!(second, Err(MediaError::RecordingBusy(_))));
    }

    #[tokio::test]
    async fn test_finished_recording_is_removed_and_notified_once() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let (handle, fake) = fake_process(9);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));

        let hub = Arc::new(EventHub::new());
        let mut events = hub.subscribe();
        let service = service_with(&config, port, Arc::clone(&hub));

        let output = service
            .start("r1", "rtsp://cam/feed", None, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(output, dir.path().join("recordings").join("r1.mp4"));
        assert!(service.get_job("r1").await.is_some());

        // Bounded duration elapsed: ffmpeg exits cleanly.
        fake.exit_tx.send(ProcessExit { code: Some(0) }).unwrap();

        match events.recv().await.unwrap() {
            MediaEvent::RecordingFinished { id, output: path, code } => {
                assert_eq!(id, "r1");
                assert_eq!(path, output);
                assert_eq!(code, Some(0));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(service.get_job("r1").await.is_none());
        assert!(service.active_ids().await.is_empty());
        assert!(matches!(
            events.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_stop_signals_and_removes_recording() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let (handle, fake) = fake_process(9);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));

        let hub = Arc::new(EventHub::new());
        let mut events = hub.subscribe();
        let service = service_with(&config, port, Arc::clone(&hub));

        service
            .start("r1", "rtsp://cam/feed", None, None)
            .await
            .unwrap();

        // SIGTERM makes ffmpeg exit nonzero; a requested stop still counts
        // as finished.
        let FakeProcess {
            mut signals,
            exit_tx,
            ..
        } = fake;
        tokio::spawn(async move {
            if let Some(TermSignal::Graceful) = signals.recv().await {
                let _ = exit_tx.send(ProcessExit { code: Some(255) });
            }
        });

        assert!(service.stop("r1").await);
        assert!(matches!(
            events.recv().await.unwrap(),
            MediaEvent::RecordingFinished { .. }
        ));
        assert!(!service.stop("r1").await);
    }

    #[tokio::test]
    async fn test_failed_recording_emits_error() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let (handle, fake) = fake_process(9);
        let mut port = MockProcessPort::new();
        port.expect_spawn().times(1).return_once(move |_| Ok(handle));

        let hub = Arc::new(EventHub::new());
        let mut events = hub.subscribe();
        let service = service_with(&config, port, Arc::clone(&hub));

        service
            .start("r1", "rtsp://cam/feed", None, None)
            .await
            .unwrap();
        fake.exit_tx.send(ProcessExit { code: Some(1) }).unwrap();

        match events.recv().await.unwrap() {
            MediaEvent::RecordingErrored { id, code, .. } => {
                assert_eq!(id, "r1");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(service.get_job("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_unknown_recording_is_false() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let service = service_with(&config, MockProcessPort::new(), Arc::new(EventHub::new()));
        assert!(!service.stop("nope").await);
    }
}
