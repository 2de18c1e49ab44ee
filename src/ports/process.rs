use crate::error::MediaResult;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Fully assembled invocation of the external media tool. Argument order is
/// fixed by the planner; the spawner only executes it.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    /// Created by the spawner before the process starts, so the tool never
    /// races against a missing destination directory.
    pub output_dir: Option<PathBuf>,
}

/// Exit outcome of a spawned process. `code` is None when the process was
/// killed by a signal before reporting a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// Polite stop (SIGTERM); the tool may flush trailers before exiting.
    Graceful,
    /// Immediate kill (SIGKILL).
    Force,
}

/// Cheap, cloneable termination control for one process. Safe to signal
/// after exit: commands to a finished process are dropped.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<TermSignal>,
}

impl ProcessControl {
    pub fn new(pid: Option<u32>, signals: mpsc::UnboundedSender<TermSignal>) -> Self {
        Self { pid, signals }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn terminate(&self) {
        let _ = self.signals.send(TermSignal::Graceful);
    }

    pub fn kill(&self) {
        let _ = self.signals.send(TermSignal::Force);
    }
}

/// Observation side of a spawned process: diagnostic stderr lines, a
/// one-shot exit notification, and the termination control.
pub struct ProcessHandle {
    pub control: ProcessControl,
    pub stderr: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<ProcessExit>,
}

impl ProcessHandle {
    pub fn new(
        control: ProcessControl,
        stderr: mpsc::Receiver<String>,
        exit: oneshot::Receiver<ProcessExit>,
    ) -> Self {
        Self {
            control,
            stderr,
            exit,
        }
    }
}

/// Port for launching external media processes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessPort: Send + Sync {
    /// Spawn one OS process for the given plan. A spawn failure (binary
    /// missing, permission denied) surfaces here synchronously.
    async fn spawn(&self, plan: CommandPlan) -> MediaResult<ProcessHandle>;
}
