//! Process supervision for external tools.
//!
//! Every generator, solver and checker invocation goes through
//! [`ProcessSupervisor::run`], which waits for the child in short slices so it
//! can enforce a per-invocation timeout and react to a [`CancelToken`]. A
//! child that overstays either is killed and reaped before returning.

use std::ffi::OsString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How an external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal (the number is unavailable on some platforms).
    Signaled(Option<i32>),
}

impl Termination {
    pub fn code(&self) -> Option<i32> {
        match self {
            Termination::Exited(code) => Some(*code),
            Termination::Signaled(_) => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Termination::Signaled(status.signal())
        }
        #[cfg(not(unix))]
        {
            Termination::Signaled(None)
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit status {code}"),
            Termination::Signaled(Some(signal)) => write!(f, "killed by signal {signal}"),
            Termination::Signaled(None) => f.write_str("killed by signal"),
        }
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where a child's output stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Null,
    /// Truncate and write.
    File(PathBuf),
    Append(PathBuf),
}

impl Redirect {
    fn open(&self) -> Result<Stdio, SuperviseError> {
        let (path, file) = match self {
            Redirect::Null => return Ok(Stdio::null()),
            Redirect::File(path) => (path, File::create(path)),
            Redirect::Append(path) => (
                path,
                OpenOptions::new().create(true).append(true).open(path),
            ),
        };
        file.map(Stdio::from)
            .map_err(|source| SuperviseError::Redirect {
                path: path.clone(),
                source,
            })
    }
}

/// One external command and its output routing.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdout: Redirect,
    pub stderr: Redirect,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout: Redirect::Null,
            stderr: Redirect::Null,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

#[derive(Debug, Error)]
pub enum SuperviseError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("failed to open output file '{}': {source}", .path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("process exceeded {}s timeout and was killed", .0.as_secs())]
    TimedOut(Duration),
    #[error("process was cancelled")]
    Cancelled,
}

/// Runs external processes one at a time under a timeout and cancel token.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    timeout: Option<Duration>,
    cancel: CancelToken,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    pub fn new(timeout: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            timeout,
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Spawn `invocation` and block until it exits, times out, or is cancelled.
    pub fn run(&self, invocation: &Invocation) -> Result<Termination, SuperviseError> {
        if self.cancel.is_cancelled() {
            return Err(SuperviseError::Cancelled);
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(invocation.stdout.open()?)
            .stderr(invocation.stderr.open()?);

        debug!(command = %invocation.command_line(), "spawning");
        let mut child = cmd.spawn().map_err(SuperviseError::Spawn)?;
        let started = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                kill_and_reap(&mut child);
                return Err(SuperviseError::Cancelled);
            }

            let slice = match self.timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        warn!(
                            command = %invocation.command_line(),
                            timeout_secs = limit.as_secs(),
                            "process timed out, killing it"
                        );
                        kill_and_reap(&mut child);
                        return Err(SuperviseError::TimedOut(limit));
                    }
                    (limit - elapsed).min(self.poll_interval)
                }
                None => self.poll_interval,
            };

            match child.wait_timeout(slice) {
                Ok(Some(status)) => return Ok(Termination::from(status)),
                Ok(None) => continue,
                Err(err) => {
                    kill_and_reap(&mut child);
                    return Err(SuperviseError::Wait(err));
                }
            }
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
