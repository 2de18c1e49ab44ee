//! Manager facade.
//!
//! One explicitly constructed object owning the registries, the event hub
//! and the shutdown token. The bootstrap builds it and hands it to
//! callers; there is no global instance.

use crate::adapters::events::EventHub;
use crate::application::capture::CaptureService;
use crate::application::recordings::RecordingService;
use crate::application::streams::StreamService;
use crate::config::Config;
use crate::domain::events::MediaEvent;
use crate::domain::session::{RecordingJob, StreamOptions, StreamSession};
use crate::error::MediaResult;
use crate::ports::process::ProcessPort;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub struct MediaManager<P: ProcessPort> {
    streams: StreamService<P>,
    recordings: RecordingService<P>,
    capture: CaptureService<P>,
    hub: Arc<EventHub>,
    shutdown: CancellationToken,
}

impl<P: ProcessPort> MediaManager<P> {
    pub fn new(config: &Config, port: P) -> Self {
        let port = Arc::new(port);
        let hub = Arc::new(EventHub::new());
        let shutdown = CancellationToken::new();

        Self {
            streams: StreamService::new(
                config,
                Arc::clone(&port),
                Arc::clone(&hub),
                shutdown.clone(),
            ),
            recordings: RecordingService::new(config, Arc::clone(&port), Arc::clone(&hub)),
            capture: CaptureService::new(config, port),
            hub,
            shutdown,
        }
    }

    /// Start or attach to the live stream for `id`. See
    /// [`StreamService::acquire`].
    pub async fn acquire(
        &self,
        id: &str,
        source_uri: &str,
        options: &StreamOptions,
    ) -> MediaResult<PathBuf> {
        self.streams.acquire(id, source_uri, options).await
    }

    /// Detach one viewer; stops the transcode when the last one leaves.
    pub async fn release(&self, id: &str) -> bool {
        self.streams.release(id).await
    }

    pub async fn get_session(&self, id: &str) -> Option<StreamSession> {
        self.streams.get_session(id).await
    }

    pub async fn list_active_sessions(&self) -> Vec<StreamSession> {
        self.streams.list_active().await
    }

    pub async fn start_recording(
        &self,
        id: &str,
        source_uri: &str,
        output_path: Option<PathBuf>,
        duration: Option<Duration>,
    ) -> MediaResult<PathBuf> {
        self.recordings.start(id, source_uri, output_path, duration).await
    }

    pub async fn stop_recording(&self, id: &str) -> bool {
        self.recordings.stop(id).await
    }

    pub async fn get_recording(&self, id: &str) -> Option<RecordingJob> {
        self.recordings.get_job(id).await
    }

    pub async fn probe(&self, source_uri: &str, timeout: Duration) -> bool {
        self.capture.probe(source_uri, timeout).await
    }

    pub async fn snapshot(
        &self,
        source_uri: &str,
        output: &Path,
        timeout: Duration,
    ) -> MediaResult<PathBuf> {
        self.capture.snapshot(source_uri, output, timeout).await
    }

    /// Receiver for lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.hub.subscribe()
    }

    /// Terminate every active session and recording and flush pending
    /// artifact cleanup. Used at process-wide teardown.
    pub async fn shutdown(&self) {
        let ids = self.streams.active_ids().await;
        join_all(ids.into_iter().map(|id| {
            let streams = &self.streams;
            async move {
                streams.force_stop(&id).await;
            }
        }))
        .await;

        let ids = self.recordings.active_ids().await;
        join_all(ids.into_iter().map(|id| {
            let recordings = &self.recordings;
            async move {
                recordings.stop(&id).await;
            }
        }))
        .await;

        self.shutdown.cancel();
    }
}
