//! Errors surfaced to callers of the orchestrator.

use std::time::Duration;

use crate::runner::CommandError;

/// Why an execution request produced no output.
///
/// `Validation` and `UnsupportedLanguage` are raised at the boundary before
/// any sandbox exists. The rest come from a provisioned sandbox.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Malformed or incomplete request.
    #[error("{0}")]
    Validation(String),

    /// Language tag outside the supported set.
    #[error("Unknown language: {0}")]
    UnsupportedLanguage(String),

    /// The dispatcher aborted before producing output: the code did not
    /// compile, had no entry point, or named a language the image lacks.
    #[error("Sandbox exited with status {exit_code}: {detail}")]
    Sandbox { exit_code: i32, detail: String },

    /// The sandbox outlived its deadline and was killed.
    #[error("Execution timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    /// Staging or launch failed independently of the submitted code.
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ExecutionError {
    /// Whether the request was rejected before provisioning.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnsupportedLanguage(_))
    }
}

impl From<CommandError> for ExecutionError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Failed {
                exit_code,
                stdout,
                stderr,
                ..
            } => Self::Sandbox {
                exit_code,
                detail: format!("{stdout}{stderr}"),
            },
            CommandError::TimedOut { timeout, .. } => Self::Timeout { after: timeout },
            e @ (CommandError::Spawn { .. } | CommandError::Io { .. }) => {
                Self::Infrastructure(e.to_string())
            }
        }
    }
}
