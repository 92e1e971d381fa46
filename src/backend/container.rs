//! Container runtime backend.
//!
//! Starts one throwaway container per sandbox through the runtime's CLI
//! (`docker run --rm ...`), with networking disabled and the staging area
//! bind-mounted read-write.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::IsolationBackend;
use crate::config::Config;
use crate::pipeline::Language;
use crate::runner::{self, CommandError, RunOptions};
use crate::sandbox::SandboxInstance;

/// Upper bound on `<runtime> kill`; a wedged runtime must not stall the
/// timeout path.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Backend driving a Docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    runtime: String,
    image: String,
    mount_point: String,
    dispatcher: Vec<String>,
}

impl ContainerBackend {
    /// Create a backend from the daemon configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            runtime: config.runtime.clone(),
            image: config.image.clone(),
            mount_point: config.mount_point.clone(),
            dispatcher: config.dispatcher.clone(),
        }
    }

    /// Arguments for `<runtime>` that start the sandbox's container.
    pub fn run_args(&self, sandbox: &SandboxInstance, language: Language) -> Vec<String> {
        let volume = format!(
            "{}:{}",
            sandbox.staging_path().display(),
            self.mount_point
        );
        let mut args: Vec<String> = [
            "run",
            "--network",
            "none",
            "--rm",
            "--name",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.push(sandbox.container_name());
        args.extend(["-a".to_string(), "STDOUT".to_string()]);
        args.extend(["-v".to_string(), volume]);
        args.push(self.image.clone());
        args.extend(self.dispatcher.iter().cloned());
        args.push(language.tag().to_string());
        args
    }
}

#[async_trait]
impl IsolationBackend for ContainerBackend {
    #[instrument(skip(self, sandbox), fields(id = %sandbox.id(), runtime = %self.runtime))]
    async fn launch(
        &self,
        sandbox: &SandboxInstance,
        language: Language,
    ) -> Result<(), CommandError> {
        let args = self.run_args(sandbox, language);
        let output = runner::run_program(&self.runtime, &args, &RunOptions::default()).await?;
        debug!(stdout_len = output.stdout.len(), "Container exited cleanly");
        Ok(())
    }

    #[instrument(skip(self, sandbox), fields(id = %sandbox.id()))]
    async fn terminate(&self, sandbox: &SandboxInstance) -> Result<(), CommandError> {
        let name = sandbox.container_name();
        runner::run_program(
            &self.runtime,
            ["kill", name.as_str()],
            &RunOptions::with_timeout(KILL_GRACE),
        )
            .await
            .map(|_| ())
    }
}
