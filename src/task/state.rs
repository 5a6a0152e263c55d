//! Single-flight task state.

use tokio::sync::watch;

use crate::process::{KillHandle, RunError};

/// Identifier of one task invocation.
pub type TaskId = u64;

/// Handle on the running task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    command_line: String,
    killer: KillHandle,
    done: watch::Receiver<bool>,
}

impl TaskHandle {
    #[must_use]
    pub fn new(
        id: TaskId,
        command_line: impl Into<String>,
        killer: KillHandle,
        done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            command_line: command_line.into(),
            killer,
            done,
        }
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Kill the task's process tree.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Signal` if the signal cannot be delivered.
    pub fn kill(&self) -> Result<(), RunError> {
        self.killer.kill()
    }

    /// Wait until the task has finished and left the `Running` state.
    pub async fn finished(&mut self) {
        // A dropped sender also means the task is gone.
        let _ = self.done.wait_for(|done| *done).await;
    }
}

/// What to do with an incoming request.
#[derive(Debug)]
pub enum InvokeDecision {
    /// Nothing is running; start the task.
    Start,
    /// A task is running and the request is not forced.
    Drop,
    /// Kill this task, wait for it, then retry.
    Preempt(TaskHandle),
}

/// Coordinator state: at most one running task.
#[derive(Debug, Default)]
pub enum TaskState {
    #[default]
    Idle,
    Running(TaskHandle),
}

impl TaskState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    /// The running task, if any.
    #[must_use]
    pub fn current(&self) -> Option<&TaskHandle> {
        match self {
            Self::Idle => None,
            Self::Running(handle) => Some(handle),
        }
    }

    /// Decide how to handle a request.
    #[must_use]
    pub fn decide(&self, force: bool) -> InvokeDecision {
        match self {
            Self::Idle => InvokeDecision::Start,
            Self::Running(_) if !force => InvokeDecision::Drop,
            Self::Running(handle) => InvokeDecision::Preempt(handle.clone()),
        }
    }

    /// Enter `Running`.
    pub fn begin(&mut self, handle: TaskHandle) {
        tracing::debug!(id = handle.id, command = %handle.command_line, "Task running");
        *self = Self::Running(handle);
    }

    /// Return to `Idle` if `id` is the running task.
    ///
    /// Returns false if another task has taken over in the meantime.
    pub fn finish(&mut self, id: TaskId) -> bool {
        match self {
            Self::Running(handle) if handle.id == id => {
                tracing::debug!(id, "Task finished");
                *self = Self::Idle;
                true
            }
            _ => false,
        }
    }
}
