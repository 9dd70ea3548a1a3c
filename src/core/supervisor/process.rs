use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::config::SupervisorConfig;
use crate::domain::error::LaunchError;

/// Upper bound on output captured from a child that died during startup
const DRAIN_LIMIT: u64 = 64 * 1024;

/// Program and arguments of a server child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl std::fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a shutdown request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    AlreadyExited { code: Option<i32> },
    Graceful { code: Option<i32> },
    Forced { code: Option<i32> },
}

impl ShutdownOutcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            ShutdownOutcome::AlreadyExited { code }
            | ShutdownOutcome::Graceful { code }
            | ShutdownOutcome::Forced { code } => *code,
        }
    }
}

/// A running child with captured stdio
pub struct ManagedProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    status: Option<ExitStatus>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ManagedProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Protocol pipes for a session client: the child's stdout and stdin
    pub fn pipes(&mut self) -> Result<(&mut BufReader<ChildStdout>, &mut ChildStdin), LaunchError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(LaunchError::PipeUnavailable { stream: "stdin" })?;
        Ok((&mut self.stdout, stdin))
    }

    /// Exit status, if the child has terminated
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.status = status,
                Err(e) => warn!(error = %e, "could not query server process status"),
            }
        }
        self.status
    }

    pub fn is_running(&mut self) -> bool {
        self.exit_status().is_none()
    }
}

/// Starts server children and checks they survive startup
#[derive(Debug, Clone)]
pub struct Supervisor {
    settle: Duration,
    drain_timeout: Duration,
}

impl Supervisor {
    pub fn new(settle: Duration, drain_timeout: Duration) -> Self {
        Self {
            settle,
            drain_timeout,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.settle(), config.drain_timeout())
    }

    /// Spawn the child with piped stdio and wait out the settle interval.
    ///
    /// A child that is already gone afterwards is reported together with
    /// whatever it wrote before dying.
    pub async fn launch(&self, spec: &LaunchSpec) -> Result<ManagedProcess, LaunchError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LaunchError::ExecutableNotFound {
                program: spec.program.clone(),
            },
            _ => LaunchError::Spawn {
                program: spec.program.clone(),
                source,
            },
        })?;
        info!(command = %spec, pid = ?child.id(), "server process started");

        let stdin = child
            .stdin
            .take()
            .ok_or(LaunchError::PipeUnavailable { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::PipeUnavailable { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(LaunchError::PipeUnavailable { stream: "stderr" })?;

        tokio::time::sleep(self.settle).await;

        let exited = child.try_wait().map_err(|source| LaunchError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let Some(status) = exited {
            let (stdout, stderr) = tokio::join!(
                drain(stdout, self.drain_timeout),
                drain(stderr, self.drain_timeout)
            );
            warn!(command = %spec, %status, "server process died during startup");
            return Err(LaunchError::ProcessDiedAtStartup {
                status: status.to_string(),
                stdout,
                stderr,
            });
        }

        let stderr_task = tokio::spawn(forward_stderr(stderr));

        Ok(ManagedProcess {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            status: None,
            stderr_task: Some(stderr_task),
        })
    }
}

/// Stop the child: close stdin, ask it to terminate, force-kill after `grace`.
///
/// Safe to call again once the child is gone; later calls report
/// `AlreadyExited` with the recorded exit code.
pub async fn shutdown(process: &mut ManagedProcess, grace: Duration) -> io::Result<ShutdownOutcome> {
    if let Some(status) = process.exit_status() {
        debug!(%status, "server process already exited");
        return Ok(ShutdownOutcome::AlreadyExited { code: status.code() });
    }

    drop(process.stdin.take());
    request_termination(&mut process.child);

    let outcome = match tokio::time::timeout(grace, process.child.wait()).await {
        Ok(status) => {
            let status = status?;
            process.status = Some(status);
            info!(%status, "server process shut down");
            ShutdownOutcome::Graceful { code: status.code() }
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "server process ignored termination, killing");
            process.child.kill().await?;
            let status = process.child.wait().await?;
            process.status = Some(status);
            ShutdownOutcome::Forced { code: status.code() }
        }
    };

    if let Some(task) = process.stderr_task.take() {
        if tokio::time::timeout(Duration::from_millis(200), task).await.is_err() {
            debug!("stderr forwarder still running after shutdown");
        }
    }

    Ok(outcome)
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to terminate server process");
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: R, timeout: Duration) -> String {
    let mut buffer = Vec::new();
    let mut limited = reader.take(DRAIN_LIMIT);
    if tokio::time::timeout(timeout, limited.read_to_end(&mut buffer)).await.is_err() {
        debug!(bytes = buffer.len(), "gave up draining child output");
    }
    String::from_utf8_lossy(&buffer).trim().to_string()
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "serial_bridge::server", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stopped forwarding server stderr");
                break;
            }
        }
    }
}
