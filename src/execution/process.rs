//! Process-backed execution adapter.
//!
//! Every action runs as a child in its own process group so that a timeout
//! (or a dropped call) takes down the whole tree, not just the leader.
//! [`ChildGuard`] owns the child and kills the group on every exit path.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::capture::{self, Captured, SharedCapture};
use super::{ExecError, ExecutionAdapter, ExecutionPlan, RawResult, Termination};

/// How long to wait for a killed child to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(2);
/// How long to keep reading pipes after the child is gone. Pipes held open
/// by an escaped grandchild are abandoned after this.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[cfg(unix)]
fn signal_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        // ESRCH just means the group is already gone.
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>) {}

fn termination_of(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signaled(signal);
        }
    }
    Termination::Exited(-1)
}

// ---------------------------------------------------------------------------
// ChildGuard
// ---------------------------------------------------------------------------

/// Owned handle to a spawned action.
///
/// Until the child has been reaped, dropping the guard kills its process
/// group. Tokio reaps the killed leader in the background.
struct ChildGuard {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            reaped: false,
        }
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        Ok(status)
    }

    /// Kill the whole group and reap the leader.
    async fn terminate(&mut self) {
        signal_group(self.pid);
        let _ = self.child.start_kill();
        match timeout(REAP_GRACE, self.child.wait()).await {
            Ok(Ok(_)) => self.reaped = true,
            Ok(Err(e)) => warn!(pid = ?self.pid, error = %e, "failed to reap killed child"),
            Err(_) => warn!(pid = ?self.pid, "killed child was not reaped in time"),
        }
    }

    /// Kill stragglers the reaped leader left in its group. Only called while
    /// one of them still holds a capture pipe, so the group id is still in
    /// use and cannot have been recycled.
    fn sweep(&self) {
        signal_group(self.pid);
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            signal_group(self.pid);
            let _ = self.child.start_kill();
        }
    }
}

// ---------------------------------------------------------------------------
// Stream pumps
// ---------------------------------------------------------------------------

struct Pump {
    sink: SharedCapture,
    handle: JoinHandle<()>,
}

impl Pump {
    fn start<R>(stream: Option<R>, max_bytes: usize, label: &'static str) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let sink = capture::shared(max_bytes);
        let task_sink = sink.clone();
        let handle = tokio::spawn(async move {
            let Some(stream) = stream else { return };
            if let Err(e) = capture::pump(stream, task_sink.clone()).await {
                debug!(stream = label, error = %e, "output pump stopped early");
                task_sink.lock().mark_interrupted();
            }
        });
        Self { sink, handle }
    }

    /// Wait briefly for EOF, then abandon the pipe. The flag is set when
    /// something still held the pipe open.
    async fn finish(self) -> (Captured, bool) {
        let abort = self.handle.abort_handle();
        let held_open = timeout(DRAIN_GRACE, self.handle).await.is_err();
        if held_open {
            abort.abort();
            self.sink.lock().mark_interrupted();
        }
        (self.sink.lock().snapshot(), held_open)
    }

    fn abort(self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// ProcessAdapter
// ---------------------------------------------------------------------------

/// Runs plans as OS child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessAdapter;

impl ProcessAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionAdapter for ProcessAdapter {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, plan: ExecutionPlan) -> Result<RawResult, ExecError> {
        let started = Instant::now();

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &plan.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &plan.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: plan.program.clone(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);
        debug!(pid = ?guard.pid, command = %plan.command_line(), "spawned action");

        let stdout = Pump::start(guard.child.stdout.take(), plan.max_output_bytes, "stdout");
        let stderr = Pump::start(guard.child.stderr.take(), plan.max_output_bytes, "stderr");

        let termination = match timeout(plan.timeout(), guard.wait()).await {
            Ok(Ok(status)) => termination_of(status),
            Ok(Err(source)) => {
                guard.terminate().await;
                stdout.abort();
                stderr.abort();
                return Err(ExecError::Wait {
                    program: plan.program.clone(),
                    source,
                });
            }
            Err(_) => {
                debug!(pid = ?guard.pid, timeout = ?plan.timeout(), "deadline passed, killing action");
                guard.terminate().await;
                Termination::TimedOut
            }
        };

        let (stdout, stdout_held) = stdout.finish().await;
        let (stderr, stderr_held) = stderr.finish().await;
        if termination != Termination::TimedOut && (stdout_held || stderr_held) {
            debug!(pid = ?guard.pid, "output still held open after exit, sweeping group");
            guard.sweep();
        }

        Ok(RawResult {
            termination,
            stdout_truncated: stdout.truncated(),
            stderr_truncated: stderr.truncated(),
            stdout: stdout.bytes,
            stderr: stderr.bytes,
            wall_duration: started.elapsed(),
            pid: guard.pid,
        })
    }
}
