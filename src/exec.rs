//! Bounded shell command execution for command-backed modules.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum characters of command output kept in an outcome detail.
pub const MAX_DETAIL_CHARS: usize = 2000;

/// Command execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Maximum command runtime; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Extra environment variables for the child process.
    pub env: BTreeMap<String, String>,
}

/// Command execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Process exit code (`None` when killed by a signal).
    pub exit_code: Option<i32>,
    /// Captured stdout text.
    pub stdout: String,
    /// Captured stderr text.
    pub stderr: String,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
}

impl ExecResult {
    /// Returns `true` when the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Combined stdout+stderr output, separated by a newline when both are non-empty.
    pub fn output(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        if stdout.is_empty() {
            return stderr.to_owned();
        }
        if stderr.is_empty() {
            return stdout.to_owned();
        }
        format!("{stdout}\n{stderr}")
    }

    /// Output trimmed to [`MAX_DETAIL_CHARS`], or the exit code when silent.
    pub fn detail(&self) -> String {
        let output = self.output();
        if output.is_empty() {
            return match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_owned(),
            };
        }
        truncate_chars(&output, MAX_DETAIL_CHARS)
    }
}

/// Errors produced while running a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The child process could not be spawned or awaited.
    #[error("failed to run command: {0}")]
    Spawn(#[from] std::io::Error),
    /// Command execution exceeded its time bound.
    #[error("command timed out after {seconds}s")]
    Timeout {
        /// Timeout budget in seconds.
        seconds: u64,
    },
}

/// Runs commands through `/bin/sh -c`, capturing output.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_owned(),
        }
    }
}

impl ShellRunner {
    /// Runner using a specific shell binary.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Execute `command` and wait for it, honoring `opts.timeout`.
    ///
    /// The shell runs in its own process group. When the timeout fires or the
    /// returned future is dropped, the whole group is killed, including
    /// pipeline stages and subshells the shell forked.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the process cannot be started and
    /// [`ExecError::Timeout`] if it outlives its bound.
    pub async fn run(&self, command: &str, opts: &ExecOptions) -> Result<ExecResult, ExecError> {
        let started = Instant::now();
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(&opts.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        debug!(shell = %self.shell, "spawning command");
        let child = cmd.spawn()?;
        let mut group = GroupKill::new(child.id());

        let output = match opts.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ExecError::Timeout {
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => child.wait_with_output().await?,
        };
        group.disarm();

        Ok(ExecResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        })
    }
}

/// Kills a spawned command's process group unless disarmed.
///
/// Held across the wait so an early return or a dropped future takes the
/// shell's descendants down with it.
struct GroupKill {
    pgid: Option<Pid>,
}

impl GroupKill {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw),
        }
    }

    /// The command finished on its own; leave its group alone.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pgid.as_raw(), "killed command process group"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "failed to kill command process group"),
        }
    }
}

/// Environment variable name for a module config key: `RAMPART_CFG_<KEY>`.
pub fn config_env_name(key: &str) -> String {
    let normalised: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("RAMPART_CFG_{normalised}")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut truncated: String = text.chars().take(max).collect();
    truncated.push_str("...");
    truncated
}
