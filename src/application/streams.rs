//! Stream registry and sharing.
//!
//! One live transcode per stream id, reference-counted across viewers.
//! The registry holds pure session records; process controls live in a
//! parallel side table so queries never touch a live OS handle.

use crate::adapters::events::EventHub;
use crate::adapters::ffmpeg::args::PLAYLIST_FILE;
use crate::adapters::ffmpeg::FfmpegPlanner;
use crate::application::supervisor;
use crate::config::Config;
use crate::domain::session::{StreamOptions, StreamSession, StreamStatus};
use crate::error::{MediaError, MediaResult};
use crate::ports::process::{ProcessControl, ProcessPort};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Live process resources for one session, kept apart from the session
/// record itself.
pub(crate) struct StreamHandle {
    pub(crate) control: ProcessControl,
    pub(crate) status_rx: watch::Receiver<StreamStatus>,
    /// Set before a requested termination so the supervisor records the
    /// exit as `Stopped` rather than `Failed`. Its identity also marks
    /// which supervisor generation owns the registry entry.
    pub(crate) stop_requested: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct StreamRegistry {
    pub(crate) sessions: HashMap<String, StreamSession>,
    pub(crate) handles: HashMap<String, StreamHandle>,
}

pub struct StreamService<P> {
    port: Arc<P>,
    planner: FfmpegPlanner,
    hub: Arc<EventHub>,
    media_dir: PathBuf,
    startup_timeout: Duration,
    stop_grace: Duration,
    cleanup_delay: Duration,
    shutdown: CancellationToken,
    registry: Arc<Mutex<StreamRegistry>>,
}

impl<P: ProcessPort> StreamService<P> {
    pub fn new(
        config: &Config,
        port: Arc<P>,
        hub: Arc<EventHub>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            port,
            planner: FfmpegPlanner::new(config.ffmpeg_bin.clone()),
            hub,
            media_dir: config.media_dir.clone(),
            startup_timeout: config.startup_timeout,
            stop_grace: config.stop_grace,
            cleanup_delay: config.cleanup_delay,
            shutdown,
            registry: Arc::new(Mutex::new(StreamRegistry::default())),
        }
    }

    /// Start a live transcode for `id`, or attach to the one already
    /// running. Returns the playlist path clients can poll.
    ///
    /// The whole look-up/spawn/register sequence runs under the registry
    /// lock, so concurrent calls for the same new id spawn exactly once.
    pub async fn acquire(
        &self,
        id: &str,
        source_uri: &str,
        options: &StreamOptions,
    ) -> MediaResult<PathBuf> {
        let out_dir = self.media_dir.join("streams").join(id);
        let playlist = out_dir.join(PLAYLIST_FILE);

        let status_rx = {
            let mut registry = self.registry.lock().await;

            if let Some(session) = registry.sessions.get_mut(id) {
                if !session.status.is_terminal() {
                    session.viewers += 1;
                    return Ok(playlist);
                }
                // A terminated session never serves new viewers.
                registry.sessions.remove(id);
                registry.handles.remove(id);
            }

            let plan = self.planner.live_stream(source_uri, &out_dir, options);
            let process = self.port.spawn(plan).await?;

            let (status_tx, status_rx) = watch::channel(StreamStatus::Starting);
            let stop_requested = Arc::new(AtomicBool::new(false));

            registry
                .sessions
                .insert(id.to_string(), StreamSession::new(id, source_uri));
            registry.handles.insert(
                id.to_string(),
                StreamHandle {
                    control: process.control.clone(),
                    status_rx: status_rx.clone(),
                    stop_requested: Arc::clone(&stop_requested),
                },
            );

            tokio::spawn(supervisor::run(
                supervisor::StreamWatch {
                    id: id.to_string(),
                    playlist: playlist.clone(),
                    artifact_dir: out_dir,
                    registry: Arc::clone(&self.registry),
                    hub: Arc::clone(&self.hub),
                    status_tx,
                    stop_requested,
                    cleanup_delay: self.cleanup_delay,
                    shutdown: self.shutdown.clone(),
                },
                process,
            ));

            status_rx
        };

        self.wait_ready(id, playlist, status_rx).await
    }

    async fn wait_ready(
        &self,
        id: &str,
        playlist: PathBuf,
        mut status_rx: watch::Receiver<StreamStatus>,
    ) -> MediaResult<PathBuf> {
        let confirmed = tokio::time::timeout(
            self.startup_timeout,
            status_rx.wait_for(|status| *status != StreamStatus::Starting),
        )
        .await;

        match confirmed {
            // The process keeps running past a startup timeout; the
            // supervisor still tracks it and `get_session` can see it.
            Err(_) => Err(MediaError::StartupTimeout {
                id: id.to_string(),
                timeout: self.startup_timeout,
            }),
            Ok(Ok(status)) if *status == StreamStatus::Running => Ok(playlist),
            Ok(_) => Err(MediaError::StartupFailed { id: id.to_string() }),
        }
    }

    /// Detach one viewer. Tears the process down only when the last viewer
    /// leaves; returns whether this call caused the stop. Unknown ids are
    /// a no-op (`false`), double releases included.
    pub async fn release(&self, id: &str) -> bool {
        let handle = {
            let mut registry = self.registry.lock().await;
            let Some(session) = registry.sessions.get_mut(id) else {
                return false;
            };
            session.viewers = session.viewers.saturating_sub(1);
            if session.viewers > 0 {
                return false;
            }
            registry.sessions.remove(id);
            registry.handles.remove(id)
        };

        if let Some(handle) = handle {
            self.stop_process(handle).await;
        }
        true
    }

    /// Stop `id` regardless of remaining viewers. Used at shutdown.
    pub(crate) async fn force_stop(&self, id: &str) -> bool {
        let handle = {
            let mut registry = self.registry.lock().await;
            if registry.sessions.remove(id).is_none() {
                return false;
            }
            registry.handles.remove(id)
        };

        if let Some(handle) = handle {
            self.stop_process(handle).await;
        }
        true
    }

    /// Graceful-then-forced termination, bounded by the stop grace window.
    async fn stop_process(&self, handle: StreamHandle) {
        handle.stop_requested.store(true, Ordering::SeqCst);
        handle.control.terminate();

        let mut status_rx = handle.status_rx;
        let exited = tokio::time::timeout(
            self.stop_grace,
            status_rx.wait_for(|status| status.is_terminal()),
        )
        .await;
        if exited.is_err() {
            handle.control.kill();
        }
    }

    pub async fn get_session(&self, id: &str) -> Option<StreamSession> {
        self.registry.lock().await.sessions.get(id).cloned()
    }

    pub async fn list_active(&self) -> Vec<StreamSession> {
        self.registry
            .lock()
            .await
            .sessions
            .values()
            .filter(|session| !session.status.is_terminal())
            .cloned()
            .collect()
    }

    pub(crate) async fn active_ids(&self) -> Vec<String> {
        self.registry.lock().await.sessions.keys().cloned().collect()
    }
}
