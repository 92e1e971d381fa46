//! Single-command execution with captured output.
//!
//! Every other component composes this primitive: build steps inside the
//! sandbox, entry-point introspection, and the container runtime on the host.
//! One attempt per call; callers decide what a failure means.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a command that exited with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Failure modes of a single command.
///
/// `Failed` and `TimedOut` carry whatever output was captured up to the
/// failure point.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {exit_code}\n{stdout}{stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs_f64())]
    TimedOut {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

/// Options for a single invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the command if it has not exited after this long.
    pub timeout: Option<Duration>,
    /// Working directory; inherited when unset.
    pub cwd: Option<PathBuf>,
}

impl RunOptions {
    /// Options bounded by `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// Run a shell command line through `sh -c`.
pub async fn run(command: &str, options: &RunOptions) -> Result<CommandOutput, CommandError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    capture(cmd, command.to_string(), options).await
}

/// Run a program directly with an argument vector, bypassing the shell.
pub async fn run_program<I, S>(
    program: &str,
    args: I,
    options: &RunOptions,
) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    let mut label = program.to_string();
    for arg in args {
        label.push(' ');
        label.push_str(&arg.as_ref().to_string_lossy());
        cmd.arg(arg);
    }
    capture(cmd, label, options).await
}

async fn capture(
    mut cmd: Command,
    label: String,
    options: &RunOptions,
) -> Result<CommandOutput, CommandError> {
    if let Some(dir) = &options.cwd {
        cmd.current_dir(dir);
    }

    let mut child = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(source) => {
            return Err(CommandError::Spawn {
                command: label,
                source,
            })
        }
    };

    let (Some(mut child_stdout), Some(mut child_stderr)) =
        (child.stdout.take(), child.stderr.take())
    else {
        return Err(CommandError::Io {
            command: label,
            source: std::io::Error::other("output pipes unavailable"),
        });
    };

    // Buffers live outside the future so partial output survives a timeout.
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let collect = async {
        let (r1, r2) = tokio::join!(
            child_stdout.read_to_end(&mut stdout_buf),
            child_stderr.read_to_end(&mut stderr_buf),
        );
        r1?;
        r2?;
        child.wait().await
    };

    let outcome = match options.timeout {
        Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
        None => Some(collect.await),
    };

    let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();
    debug!(command = %label, %stdout, %stderr, "Command finished");

    let Some(status) = outcome else {
        let _ = child.kill().await;
        return Err(CommandError::TimedOut {
            command: label,
            timeout: options.timeout.unwrap_or_default(),
            stdout,
            stderr,
        });
    };

    let status = status.map_err(|source| CommandError::Io {
        command: label.clone(),
        source,
    })?;

    if !status.success() {
        return Err(CommandError::Failed {
            command: label,
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}
