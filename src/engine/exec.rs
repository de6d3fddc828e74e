//! Execution harness: run a job's command as a child process under a
//! wall-clock timeout and append its output to the job's log sidecar.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Job, JobId};

/// How one execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Exit code 0.
    Success,
    /// Non-zero exit. `None` when the process was killed by a signal.
    Failed { exit_code: Option<i32> },
    /// Exceeded the timeout and was killed.
    TimedOut,
    /// Could not be spawned or waited on.
    Error(String),
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Success)
    }

    /// Short label for metrics and the sidecar exit marker.
    pub fn label(&self) -> &'static str {
        match self {
            ExecOutcome::Success => "success",
            ExecOutcome::Failed { .. } => "failure",
            ExecOutcome::TimedOut => "timeout",
            ExecOutcome::Error(_) => "error",
        }
    }

    fn exit_marker(&self) -> String {
        match self {
            ExecOutcome::Success => "exit=0".to_string(),
            ExecOutcome::Failed {
                exit_code: Some(code),
            } => format!("exit={code}"),
            ExecOutcome::Failed { exit_code: None } => "exit=signal".to_string(),
            ExecOutcome::TimedOut => "exit=timeout".to_string(),
            ExecOutcome::Error(_) => "exit=error".to_string(),
        }
    }
}

/// Result of running a job's command once.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: ExecOutcome,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run `job.command` via `sh -c`, killing it if it outlives `timeout`.
///
/// The shell leads its own process group so a timeout takes down everything
/// it spawned, not just `sh`. Never returns an error: spawn and wait
/// failures become [`ExecOutcome::Error`] so the caller applies the retry
/// policy.
pub async fn run_command(job: &Job, timeout: Duration) -> Execution {
    let start = Instant::now();

    debug!(id = %job.id, command = %job.command, ?timeout, "spawning job command");

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&job.command)
        .env("QUEUECTL_JOB_ID", job.id.as_str())
        .env("QUEUECTL_ATTEMPT", job.attempts.saturating_add(1).to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Execution {
                outcome: ExecOutcome::Error(format!("spawn failed: {e}")),
                stdout: String::new(),
                stderr: e.to_string(),
                duration: start.elapsed(),
            };
        }
    };
    let pid = child.id();

    let mut wait = Box::pin(child.wait_with_output());

    match tokio::time::timeout(timeout, &mut wait).await {
        Ok(Ok(output)) => Execution {
            outcome: if output.status.success() {
                ExecOutcome::Success
            } else {
                ExecOutcome::Failed {
                    exit_code: output.status.code(),
                }
            },
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        },
        Ok(Err(e)) => Execution {
            outcome: ExecOutcome::Error(format!("wait failed: {e}")),
            stdout: String::new(),
            stderr: e.to_string(),
            duration: start.elapsed(),
        },
        Err(_) => {
            // Kill the group while the leader is still unreaped, then drop
            // the wait future so `kill_on_drop` reaps `sh` itself.
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            drop(wait);
            Execution {
                outcome: ExecOutcome::TimedOut,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs_f64()),
                duration: start.elapsed(),
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, cannot kill process group");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill job process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Path of the log sidecar for `id` under `log_dir`.
pub fn log_path(log_dir: &Path, id: &JobId) -> PathBuf {
    log_dir.join(format!("{}.log", sanitize(id.as_str())))
}

/// Append one execution's command, output and exit marker to the job's sidecar.
pub async fn append_log(log_dir: &Path, job: &Job, execution: &Execution) -> Result<()> {
    tokio::fs::create_dir_all(log_dir).await?;

    let entry = format!(
        "=== {} attempt {} ===\ncommand: {}\n--- stdout ---\n{}\n--- stderr ---\n{}\n{}\n",
        chrono::Utc::now().to_rfc3339(),
        job.attempts.saturating_add(1),
        job.command,
        execution.stdout.trim_end(),
        execution.stderr.trim_end(),
        execution.outcome.exit_marker(),
    );

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(log_dir, &job.id))
        .await?;
    file.write_all(entry.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Read a job's sidecar, `None` if it has never run.
pub async fn read_log(log_dir: &Path, id: &JobId) -> Result<Option<String>> {
    match tokio::fs::read_to_string(log_path(log_dir, id)).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            warn!(id = %id, error = %e, "failed to read job log");
            Err(e.into())
        }
    }
}

/// Caller-supplied ids may contain path separators.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
