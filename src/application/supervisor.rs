//! Per-session lifecycle supervision.
//!
//! One task per spawned stream: confirms readiness, applies state
//! transitions, emits lifecycle events and schedules delayed artifact
//! cleanup. Transitions for an id all pass through its single supervisor,
//! so observers see them strictly ordered.

use crate::adapters::events::EventHub;
use crate::application::streams::StreamRegistry;
use crate::domain::events::MediaEvent;
use crate::domain::session::StreamStatus;
use crate::ports::process::{ProcessExit, ProcessHandle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// How often the supervisor looks for the playlist while a stream starts.
/// Playlist existence on disk is the authoritative readiness signal; the
/// process's own diagnostics are only logged.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) struct StreamWatch {
    pub id: String,
    pub playlist: PathBuf,
    pub artifact_dir: PathBuf,
    pub registry: Arc<Mutex<StreamRegistry>>,
    pub hub: Arc<EventHub>,
    pub status_tx: watch::Sender<StreamStatus>,
    pub stop_requested: Arc<AtomicBool>,
    pub cleanup_delay: Duration,
    pub shutdown: CancellationToken,
}

pub(crate) async fn run(ctx: StreamWatch, mut process: ProcessHandle) {
    let mut poll = tokio::time::interval(READY_POLL_INTERVAL);
    let mut running = false;

    let exit = loop {
        tokio::select! {
            _ = poll.tick(), if !running => {
                if tokio::fs::try_exists(&ctx.playlist).await.unwrap_or(false) {
                    running = true;
                    apply(&ctx, StreamStatus::Running).await;
                    tracing::info!(stream = %ctx.id, "stream running");
                    let _ = ctx.hub.publish(MediaEvent::StreamStarted {
                        id: ctx.id.clone(),
                        playlist: ctx.playlist.clone(),
                    });
                }
            }
            Some(line) = process.stderr.recv() => {
                tracing::debug!(target: "ffmpeg", stream = %ctx.id, "{line}");
            }
            exit = &mut process.exit => {
                break exit.unwrap_or(ProcessExit { code: None });
            }
        }
    };

    // A requested stop counts as clean even though SIGTERM makes ffmpeg
    // exit nonzero.
    let requested = ctx.stop_requested.load(Ordering::SeqCst);
    let terminal = if requested || exit.success() {
        StreamStatus::Stopped
    } else {
        StreamStatus::Failed
    };
    apply(&ctx, terminal).await;

    if terminal == StreamStatus::Stopped {
        tracing::info!(stream = %ctx.id, "stream stopped");
        let _ = ctx.hub.publish(MediaEvent::StreamStopped { id: ctx.id.clone() });
    } else {
        tracing::warn!(stream = %ctx.id, code = ?exit.code, "stream process failed");
        let _ = ctx.hub.publish(MediaEvent::StreamErrored {
            id: ctx.id.clone(),
            code: exit.code,
        });
    }

    schedule_cleanup(ctx);
}

/// Record a transition in the session map (when this supervisor still owns
/// the entry) and broadcast it on the status channel.
async fn apply(ctx: &StreamWatch, next: StreamStatus) {
    {
        let mut registry = ctx.registry.lock().await;
        let owned = registry
            .handles
            .get(&ctx.id)
            .map_or(false, |handle| {
                Arc::ptr_eq(&handle.stop_requested, &ctx.stop_requested)
            });
        if owned {
            if next.is_terminal() {
                // The process is gone; its control is useless from here on.
                registry.handles.remove(&ctx.id);
            }
            if let Some(session) = registry.sessions.get_mut(&ctx.id) {
                if session.advance(next) && next == StreamStatus::Running {
                    session.playlist = Some(ctx.playlist.clone());
                }
            }
        }
    }
    let _ = ctx.status_tx.send(next);
}

/// Artifact removal runs after a delay so trailing readers can drain the
/// last segments; shutdown flushes it immediately.
fn schedule_cleanup(ctx: StreamWatch) {
    let StreamWatch {
        id,
        artifact_dir,
        registry,
        cleanup_delay,
        shutdown,
        ..
    } = ctx;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(cleanup_delay) => {}
            _ = shutdown.cancelled() => {}
        }

        // A fresh session for the same id may own the directory again.
        if registry.lock().await.handles.contains_key(&id) {
            return;
        }
        match tokio::fs::remove_dir_all(&artifact_dir).await {
            Ok(()) => tracing::debug!(stream = %id, "removed stream artifacts"),
            Err(err) => tracing::debug!(stream = %id, "artifact cleanup skipped: {err}"),
        }
    });
}
