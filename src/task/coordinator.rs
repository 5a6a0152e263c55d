//! Task coordinator for running cargo subcommands.
//!
//! This module connects the process runner, the diagnostic parser and the
//! output sinks. At most one task runs at a time: a new request is dropped
//! while another task is running unless it is forced, in which case the
//! running task is killed first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::diagnostics::DiagnosticParser;
use crate::display;
use crate::process::{
    ExitOutcome, KillHandle, OutputLine, ProcessRequest, RunError, SpawnError, TaskProcess,
};
use crate::sink::{DiagnosticSink, Notice, Notifier, TextSink};
use crate::task::{
    augment_args, CheckSupport, CheckTarget, InvokeDecision, TaskHandle, TaskId, TaskState,
};

/// Error type for coordinator operations.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    /// The build tool could not be launched.
    #[error("Failed to launch build tool: {0}")]
    Spawn(#[from] SpawnError),
    /// The process failed after it was launched.
    #[error(transparent)]
    Run(#[from] RunError),
    /// The task driving the process panicked or was aborted.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A request to run one cargo subcommand.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Kill a running task instead of dropping this request.
    pub force: bool,
}

impl TaskRequest {
    #[must_use]
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            force: false,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// How a started task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Exited {
        code: Option<i32>,
        elapsed: Duration,
    },
    Cancelled,
}

/// Summary of a finished task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: TaskId,
    pub command_line: String,
    pub outcome: TaskOutcome,
    /// Diagnostics forwarded to the sink.
    pub diagnostics: usize,
    /// JSON-looking lines that could not be parsed.
    pub malformed_lines: usize,
}

impl TaskReport {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.outcome == TaskOutcome::Cancelled
    }

    /// Exit code, if the process exited with one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            TaskOutcome::Exited { code, .. } => code,
            TaskOutcome::Cancelled => None,
        }
    }
}

/// Awaitable result of a started task.
#[derive(Debug)]
pub struct TaskTicket {
    id: TaskId,
    join: JoinHandle<Result<TaskReport, TaskError>>,
}

impl TaskTicket {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the task to end.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` if the process could not be waited on.
    pub async fn wait(self) -> Result<TaskReport, TaskError> {
        self.join.await?
    }
}

/// Result of an `invoke` call.
#[derive(Debug)]
pub enum Invocation {
    Started(TaskTicket),
    /// Another task was running and the request was not forced.
    Dropped,
}

impl Invocation {
    /// The ticket, if the task was started.
    #[must_use]
    pub fn ticket(self) -> Option<TaskTicket> {
        match self {
            Self::Started(ticket) => Some(ticket),
            Self::Dropped => None,
        }
    }
}

/// Where task output goes.
#[derive(Clone)]
pub struct Sinks {
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub text: Arc<dyn TextSink>,
    pub notifier: Arc<dyn Notifier>,
}

struct Inner {
    program: String,
    env: HashMap<String, String>,
    check_target: CheckTarget,
    sinks: Sinks,
    state: Mutex<TaskState>,
    next_id: AtomicU64,
    check_support: OnceCell<CheckSupport>,
}

/// Runs cargo tasks one at a time.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TaskCoordinator {
    inner: Arc<Inner>,
}

impl TaskCoordinator {
    #[must_use]
    pub fn new(config: &RunnerConfig, sinks: Sinks) -> Self {
        Self {
            inner: Arc::new(Inner {
                program: config.cargo_path.clone(),
                env: config.environment(),
                check_target: config.check_target,
                sinks,
                state: Mutex::new(TaskState::Idle),
                next_id: AtomicU64::new(1),
                check_support: OnceCell::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true while a task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_state().is_running()
    }

    /// Id of the running task, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        self.lock_state().current().map(TaskHandle::id)
    }

    /// Run `request` unless another task is running.
    ///
    /// A forced request kills the running task, waits for it to end and
    /// then tries again.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Spawn` if cargo cannot be launched, or
    /// `TaskError::Run` if the running task cannot be killed.
    pub async fn invoke(&self, request: TaskRequest) -> Result<Invocation, TaskError> {
        loop {
            let mut running = {
                let mut state = self.lock_state();
                match state.decide(request.force) {
                    InvokeDecision::Start => {
                        return self.start(&mut state, &request).map(Invocation::Started);
                    }
                    InvokeDecision::Drop => {
                        tracing::debug!(
                            command = %request.command,
                            "Task already running, dropping request"
                        );
                        return Ok(Invocation::Dropped);
                    }
                    InvokeDecision::Preempt(handle) => handle,
                }
            };

            tracing::info!(
                id = running.id(),
                running = %running.command_line(),
                command = %request.command,
                "Preempting running task"
            );
            running.kill()?;
            running.finished().await;
            self.clear_stale(running.id());
        }
    }

    /// Kill the running task and wait for it.
    ///
    /// Returns false if nothing was running.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Run` if the kill signal cannot be delivered.
    pub async fn stop(&self) -> Result<bool, TaskError> {
        let current = self.lock_state().current().cloned();
        let Some(mut running) = current else {
            return Ok(false);
        };
        tracing::info!(id = running.id(), "Stopping task");
        running.kill()?;
        running.finished().await;
        self.clear_stale(running.id());
        Ok(true)
    }

    /// Leave `Running` for a task whose driver ended without doing so.
    fn clear_stale(&self, id: TaskId) {
        if self.lock_state().finish(id) {
            tracing::warn!(id, "Cleared task that ended without finishing");
        }
    }

    /// Check the package, falling back to `rustc` on cargo without `check`.
    ///
    /// # Errors
    ///
    /// See [`TaskCoordinator::invoke`].
    pub async fn check(
        &self,
        working_dir: &Path,
        target: Option<CheckTarget>,
        force: bool,
    ) -> Result<Invocation, TaskError> {
        let target = target.unwrap_or(self.inner.check_target);
        let (command, args) = self.check_support(working_dir).await.command_for(target);
        self.invoke(
            TaskRequest::new(command, working_dir)
                .args(args)
                .force(force),
        )
        .await
    }

    /// Whether `cargo check` exists. Probed once, then cached.
    pub async fn check_support(&self, working_dir: &Path) -> CheckSupport {
        *self
            .inner
            .check_support
            .get_or_init(|| self.probe_check(working_dir))
            .await
    }

    async fn probe_check(&self, working_dir: &Path) -> CheckSupport {
        let request = ProcessRequest::new(&self.inner.program, "check", working_dir)
            .args(["--help"])
            .envs(&self.inner.env);

        match TaskProcess::execute(&request, || {}, |_| {}).await {
            Ok(ExitOutcome::Exited(Some(0))) => {
                tracing::debug!("cargo check is available");
                CheckSupport::Supported
            }
            Ok(outcome) => {
                tracing::info!(?outcome, "cargo check unavailable, falling back to rustc");
                CheckSupport::Unsupported
            }
            Err(e) => {
                // The real invocation will report the missing tool.
                tracing::warn!(error = %e, "Could not probe cargo check");
                CheckSupport::Supported
            }
        }
    }

    /// Spawn the task and enter `Running`. Called with the state lock held.
    fn start(&self, state: &mut TaskState, request: &TaskRequest) -> Result<TaskTicket, TaskError> {
        let sinks = &self.inner.sinks;
        let process_request =
            ProcessRequest::new(&self.inner.program, &request.command, &request.working_dir)
                .args(augment_args(&request.command, &request.args))
                .envs(&self.inner.env);
        let command_line = process_request.display_command();

        sinks.diagnostics.clear();
        sinks.text.append_line(&format!("Started {command_line}"));

        let process = match TaskProcess::spawn(&process_request) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, command = %command_line, "Failed to launch task");
                sinks.notifier.notify(Notice::ToolNotAvailable {
                    program: self.inner.program.clone(),
                });
                return Err(e.into());
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = watch::channel(false);
        state.begin(TaskHandle::new(
            id,
            command_line.clone(),
            process.kill_handle(),
            done_rx,
        ));
        tracing::info!(id, command = %command_line, "Task started");

        let guard = FinishGuard {
            coordinator: self.clone(),
            id,
            killer: process.kill_handle(),
            done: done_tx,
        };
        let coordinator = self.clone();
        let working_dir = request.working_dir.clone();
        let join = tokio::spawn(async move {
            let finish = guard;
            let result = coordinator
                .drive(id, command_line, process, &working_dir)
                .await;
            drop(finish);
            result
        });

        Ok(TaskTicket { id, join })
    }

    /// Route output until the process ends, then report.
    async fn drive(
        &self,
        id: TaskId,
        command_line: String,
        process: TaskProcess,
        working_dir: &Path,
    ) -> Result<TaskReport, TaskError> {
        let sinks = &self.inner.sinks;
        let started = Instant::now();
        let mut parser = DiagnosticParser::new();
        let mut diagnostics = 0;
        let mut malformed_lines = 0;

        let outcome = process
            .run(|line| match line {
                OutputLine::Stdout(text) if looks_like_json(&text) => {
                    match parser.parse_line(&text) {
                        Ok(found) => {
                            diagnostics += found.len();
                            for diagnostic in found {
                                sinks.diagnostics.publish(diagnostic, working_dir);
                            }
                        }
                        Err(e) => {
                            malformed_lines += 1;
                            tracing::warn!(error = %e, "Skipping malformed tool event");
                        }
                    }
                }
                OutputLine::Stdout(text) | OutputLine::Stderr(text) => {
                    sinks.text.append_line(&text);
                }
            })
            .await;

        let outcome = match outcome {
            Ok(ExitOutcome::Exited(code)) => {
                let elapsed = started.elapsed();
                match code {
                    Some(code) => sinks.text.append_line(&format!("Completed with code {code}")),
                    None => sinks.text.append_line("Completed: terminated by signal"),
                }
                sinks.text.append_line(&format!(
                    "Finished in {}",
                    display::format_elapsed(elapsed)
                ));
                tracing::info!(id, ?code, ?elapsed, diagnostics, "Task completed");
                TaskOutcome::Exited { code, elapsed }
            }
            Ok(ExitOutcome::Cancelled) => {
                tracing::debug!(id, "Task cancelled");
                TaskOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(id, error = %e, "Task failed");
                return Err(e.into());
            }
        };

        Ok(TaskReport {
            id,
            command_line,
            outcome,
            diagnostics,
            malformed_lines,
        })
    }
}

/// Owned by the driving task. Dropping it, on return or on panic, leaves
/// `Running` and wakes everyone waiting in [`TaskHandle::finished`].
struct FinishGuard {
    coordinator: TaskCoordinator,
    id: TaskId,
    killer: KillHandle,
    done: watch::Sender<bool>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(id = self.id, "Task driver panicked");
            if let Err(e) = self.killer.kill() {
                tracing::warn!(id = self.id, error = %e, "Failed to kill abandoned task");
            }
        }
        self.coordinator.lock_state().finish(self.id);
        let _ = self.done.send(true);
    }
}

/// Cargo's JSON messages are single-line objects.
fn looks_like_json(line: &str) -> bool {
    line.trim_start().starts_with('{')
}
