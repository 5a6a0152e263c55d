//! Build tool process spawning and control.
//!
//! A [`ProcessRequest`] describes one invocation; [`TaskProcess`] owns the
//! spawned child, yields its output line by line and reports how it ended.
//! [`KillHandle`] can be cloned out of a running process to stop it from
//! elsewhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::process::{output_lines, LineStream, OutputLine};

/// How long output is still read once the process has exited.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("{program} not found")]
    NotFound { program: String },
    /// Permission denied when spawning.
    #[error("Permission denied launching {program}")]
    PermissionDenied { program: String },
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A pipe was not set up on the child.
    #[error("Process {0} not available")]
    MissingPipe(&'static str),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                program: program.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                program: program.to_string(),
            },
            _ => Self::Io(err),
        }
    }
}

/// Error type for a process that was spawned.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Waiting for the child failed.
    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
    /// The termination signal could not be delivered.
    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own. `None` if it died from a signal we did not send.
    Exited(Option<i32>),
    /// The process was killed through its [`KillHandle`].
    Cancelled,
}

/// Description of one tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    program: String,
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env: HashMap<String, String>,
}

impl ProcessRequest {
    /// Run `program command` in `working_dir`.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    /// Append arguments after the command.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set environment overrides. They win over the inherited environment.
    #[must_use]
    pub fn envs(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn get_working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The full argument list: command followed by its arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.command.clone());
        args.extend(self.args.iter().cloned());
        args
    }

    /// Human-readable command line.
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut line = self.program.clone();
        for arg in self.build_args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}

#[derive(Debug)]
struct KillState {
    pid: Option<u32>,
    interrupted: AtomicBool,
    token: CancellationToken,
}

/// Cloneable handle that stops a running process and its children.
#[derive(Debug, Clone)]
pub struct KillHandle {
    inner: Arc<KillState>,
}

impl KillHandle {
    fn new(pid: Option<u32>) -> Self {
        Self {
            inner: Arc::new(KillState {
                pid,
                interrupted: AtomicBool::new(false),
                token: CancellationToken::new(),
            }),
        }
    }

    /// A handle with no process behind it. Killing it only marks it interrupted.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(None)
    }

    /// Send a termination signal to the whole process tree.
    ///
    /// Only the first call does anything. Returns once the signal has been
    /// sent; the process may still be shutting down.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Signal` if the signal cannot be delivered.
    pub fn kill(&self) -> Result<(), RunError> {
        if self.inner.interrupted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(pid = ?self.inner.pid, "Killing process tree");
        self.inner.token.cancel();
        self.signal_tree()
    }

    /// Returns true once `kill` has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    #[cfg(unix)]
    fn signal_tree(&self) -> Result<(), RunError> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.inner.pid else {
            return Ok(());
        };
        // The child leads its own process group, so this reaches grandchildren too.
        let group = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        match killpg(group, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RunError::Signal {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn signal_tree(&self) -> Result<(), RunError> {
        // The run loop kills the direct child when the token fires.
        Ok(())
    }
}

/// A spawned build tool process.
pub struct TaskProcess {
    child: Child,
    lines: LineStream,
    killer: KillHandle,
}

impl TaskProcess {
    /// Spawn the process described by `request`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(request: &ProcessRequest) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(request.build_args())
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&request.program, e))?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SpawnError::MissingPipe("stderr"))?;

        tracing::debug!(
            pid = ?child.id(),
            command = %request.display_command(),
            cwd = %request.working_dir.display(),
            "Spawned process"
        );

        Ok(Self {
            killer: KillHandle::new(child.id()),
            lines: output_lines(stdout, stderr),
            child,
        })
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Handle for stopping this process from another task.
    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        self.killer.clone()
    }

    /// Next output line, or `None` once both streams are closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.next().await
    }

    /// Deliver output lines to `on_line` until the process exits.
    ///
    /// The run ends when the exit is observed, not when the pipes close: a
    /// background grandchild holding stdout open does not keep it going.
    /// Output still in flight at exit is read for up to [`DRAIN_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns `RunError::Wait` if the exit status cannot be collected.
    pub async fn run<F>(mut self, mut on_line: F) -> Result<ExitOutcome, RunError>
    where
        F: FnMut(OutputLine),
    {
        let token = self.killer.inner.token.clone();
        let mut kill_seen = false;

        let status = loop {
            tokio::select! {
                biased;

                () = token.cancelled(), if !kill_seen => {
                    kill_seen = true;
                    #[cfg(not(unix))]
                    if let Err(e) = self.child.start_kill() {
                        tracing::warn!(error = %e, "Failed to kill process");
                    }
                }
                line = self.lines.next() => match line {
                    Some(line) => on_line(line),
                    None => break self.child.wait().await.map_err(RunError::Wait)?,
                },
                status = self.child.wait() => {
                    let status = status.map_err(RunError::Wait)?;
                    self.drain(&mut on_line).await;
                    break status;
                }
            }
        };

        if self.killer.is_interrupted() {
            tracing::debug!(?status, "Process ended after kill");
            return Ok(ExitOutcome::Cancelled);
        }
        tracing::debug!(code = ?status.code(), "Process exited");
        Ok(ExitOutcome::Exited(status.code()))
    }

    /// Forward lines that were written before the exit.
    async fn drain<F>(&mut self, on_line: &mut F)
    where
        F: FnMut(OutputLine),
    {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.lines.next()).await {
                Ok(Some(line)) => on_line(line),
                Ok(None) => return,
                Err(_) => {
                    tracing::debug!(pid = ?self.killer.inner.pid, "Output still open after exit");
                    return;
                }
            }
        }
    }

    /// Run `request` to completion.
    ///
    /// `on_start` is called right before the process is spawned.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Spawn` if the tool cannot be launched.
    pub async fn execute<S, F>(
        request: &ProcessRequest,
        on_start: S,
        on_line: F,
    ) -> Result<ExitOutcome, RunError>
    where
        S: FnOnce(),
        F: FnMut(OutputLine),
    {
        on_start();
        let process = Self::spawn(request)?;
        process.run(on_line).await
    }
}
