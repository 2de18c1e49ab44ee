//! Real process adapter: spawns ffmpeg and bridges its stderr, exit and
//! termination into channels.

use crate::error::{MediaError, MediaResult};
use crate::ports::process::{
    CommandPlan, ProcessControl, ProcessExit, ProcessHandle, ProcessPort, TermSignal,
};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Copy)]
pub struct FfmpegSpawner;

impl FfmpegSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessPort for FfmpegSpawner {
    async fn spawn(&self, plan: CommandPlan) -> MediaResult<ProcessHandle> {
        if let Some(dir) = &plan.output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut child = Command::new(&plan.program)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn {
                program: plan.program.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::debug!(program = %plan.program, pid = ?pid, "spawned media process");

        let (line_tx, line_rx) = mpsc::channel(64);
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(stderr, line_tx));
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(drive(child, signal_rx, exit_tx));

        Ok(ProcessHandle::new(
            ProcessControl::new(pid, signal_tx),
            line_rx,
            exit_rx,
        ))
    }
}

/// Forwards stderr lines to the observer; keeps draining after the observer
/// goes away so the process never blocks on a full pipe.
async fn pump_stderr(stderr: ChildStderr, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stderr).lines();
    let mut forward = true;
    while let Ok(Some(line)) = lines.next_line().await {
        if forward && tx.send(line).await.is_err() {
            forward = false;
        }
    }
}

/// Owns the child until exit: applies termination signals and reports the
/// exit outcome exactly once.
async fn drive(
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<TermSignal>,
    exit_tx: oneshot::Sender<ProcessExit>,
) {
    let exit = loop {
        tokio::select! {
            Some(signal) = signals.recv() => match signal {
                TermSignal::Graceful => request_stop(&mut child),
                TermSignal::Force => {
                    let _ = child.start_kill();
                }
            },
            status = child.wait() => {
                break match status {
                    Ok(status) => ProcessExit {
                        code: status.code(),
                    },
                    Err(_) => ProcessExit { code: None },
                };
            }
        }
    };
    let _ = exit_tx.send(exit);
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    // SIGTERM lets ffmpeg flush its output trailer before exiting.
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}
