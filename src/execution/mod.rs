//! Execution Adapter: runs one external action under a deadline and an
//! output cap, and reports what happened as a [`RawResult`].
//!
//! The adapter never treats "the tool failed" as an error: a nonzero exit,
//! a signal, or a timeout all come back as a `RawResult`. [`ExecError`] is
//! reserved for actions that could not be started at all.

pub mod capture;
pub mod process;

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use capture::{CaptureBuffer, Captured};
pub use process::ProcessAdapter;

/// Deadline used when a plan does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound for any plan deadline.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Smallest deadline a plan can carry.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);
/// Per-stream capture cap used when a plan does not set one.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// Everything needed to run one external action.
///
/// Built fresh for every call and moved into the adapter, so no two calls
/// ever share a plan. The deadline is private to keep it finite and positive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Program to execute, resolved through `PATH` when not absolute.
    pub program: String,
    /// Arguments passed verbatim (no shell involved).
    pub args: Vec<String>,
    /// Working directory for the child. `None` inherits the server's.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables layered over the server's environment.
    pub env: Vec<(String, String)>,
    /// Per-stream capture cap in bytes.
    pub max_output_bytes: usize,
    timeout: Duration,
}

impl ExecutionPlan {
    /// Create a plan for `program` with default deadline and capture cap.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the action inside `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the deadline, clamped to `[MIN_TIMEOUT, MAX_TIMEOUT]`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        self
    }

    /// Set the per-stream capture cap.
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// The deadline after which the action is forcibly terminated.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Human-readable command line, for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ---------------------------------------------------------------------------
// RawResult
// ---------------------------------------------------------------------------

/// How an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The action exited on its own with this status code.
    Exited(i32),
    /// The action was killed by a signal it did not expect (unix only).
    Signaled(i32),
    /// The deadline passed and the adapter terminated the action.
    TimedOut,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit status {}", code),
            Termination::Signaled(signal) => write!(f, "signal {}", signal),
            Termination::TimedOut => write!(f, "timeout"),
        }
    }
}

/// The unprocessed outcome of one action. Consumed by the capability's
/// normalizer and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes were discarded from stdout because of the capture cap.
    pub stdout_truncated: bool,
    /// Bytes were discarded from stderr because of the capture cap.
    pub stderr_truncated: bool,
    pub wall_duration: Duration,
    /// OS process id of the action, when one was spawned.
    pub pid: Option<u32>,
}

impl RawResult {
    /// A completed action with the given exit code and untruncated output.
    pub fn exited(code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            termination: Termination::Exited(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            stdout_truncated: false,
            stderr_truncated: false,
            wall_duration: Duration::ZERO,
            pid: None,
        }
    }

    /// Mark stdout as cut off by the capture cap.
    pub fn with_truncated_stdout(mut self) -> Self {
        self.stdout_truncated = true;
        self
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    pub fn timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

// ---------------------------------------------------------------------------
// ExecutionAdapter
// ---------------------------------------------------------------------------

/// Failure to start an action at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of '{program}' while waiting for it: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// The contract every execution backend implements.
///
/// `run` must release every resource it acquired (children, pipes) before it
/// returns, on every path.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Run `plan` to completion or to its deadline.
    async fn run(&self, plan: ExecutionPlan) -> Result<RawResult, ExecError>;
}
