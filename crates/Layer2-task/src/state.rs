//! Task lifecycle states and exit results

use serde::{Deserialize, Serialize};

/// Lifecycle of a monitored task. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskLifecycle {
    Running,
    Exited,
}

impl TaskLifecycle {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskLifecycle::Exited)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskLifecycle::Running => "running",
            TaskLifecycle::Exited => "exited",
        }
    }
}

impl std::fmt::Display for TaskLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// How a task (or an exec session) ended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitResult {
    pub exit_code: i32,
    pub signal: i32,
    pub oom_killed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl ExitResult {
    /// Result recorded when a container is found gone. The runtime does not
    /// report the real exit status.
    pub fn synthetic() -> Self {
        Self::default()
    }

    /// Container could no longer be observed. Like `synthetic`, but carries
    /// the last liveness error.
    pub fn lost(err: impl Into<String>) -> Self {
        Self {
            err: Some(err.into()),
            ..Self::synthetic()
        }
    }

    /// Generic failure carrying the underlying error
    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            err: Some(err.into()),
            ..Default::default()
        }
    }

    pub fn successful(&self) -> bool {
        self.exit_code == 0 && self.signal == 0 && self.err.is_none()
    }
}
