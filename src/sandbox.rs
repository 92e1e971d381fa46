//! Sandbox instances and their staging areas.
//!
//! A [`SandboxInstance`] exclusively owns one staging directory on the host,
//! named after a random id. The directory is removed when the instance is
//! released, or on drop if release never ran.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;

/// Files shared between the orchestrator and the dispatcher, relative to the
/// staging area.
pub mod layout {
    /// Submitted source, written before launch.
    pub const CODE: &str = "code";
    /// Program stdout, written by the dispatcher.
    pub const STDOUT: &str = "stdout";
    /// Program stderr, written by the dispatcher.
    pub const STDERR: &str = "stderr";
}

/// Source of sandbox ids.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> String;
}

/// 64 random bits from the thread-local CSPRNG, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokens;

impl TokenSource for RandomTokens {
    fn next_token(&self) -> String {
        let bytes: [u8; 8] = rand::random();
        hex::encode(bytes)
    }
}

/// Replays a fixed list of tokens, then repeats the last one.
#[derive(Debug)]
pub struct FixedTokens {
    tokens: Mutex<Vec<String>>,
}

impl FixedTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        tokens.reverse();
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenSource for FixedTokens {
    fn next_token(&self) -> String {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if tokens.len() > 1 {
            tokens.pop().unwrap_or_default()
        } else {
            tokens.last().cloned().unwrap_or_default()
        }
    }
}

/// Captured output of the program that ran in a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One provisioned sandbox and the staging area it owns.
#[derive(Debug)]
pub struct SandboxInstance {
    id: String,
    staging: PathBuf,
    deadline: Duration,
    released: bool,
}

impl SandboxInstance {
    /// Create the staging area for `id` and fill it from the template.
    ///
    /// Fails if the staging path already exists; a directory this call did not
    /// create is left alone.
    pub async fn provision(config: &Config, id: String, deadline: Duration) -> Result<Self> {
        let staging = config.staging_path(&id);

        tokio::fs::create_dir(&staging)
            .await
            .with_context(|| format!("Failed to create staging area {}", staging.display()))?;

        let instance = Self {
            id,
            staging,
            deadline,
            released: false,
        };

        let template = config.template_dir.clone();
        let target = instance.staging.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&template, &target))
            .await
            .context("Template copy task panicked")
            .and_then(|r| r);

        if let Err(e) = copied {
            instance.release().await;
            return Err(e);
        }

        debug!(id = %instance.id, path = %instance.staging.display(), "Provisioned staging area");
        Ok(instance)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Name the isolated environment runs under.
    pub fn container_name(&self) -> String {
        format!("compile-box-{}", self.id)
    }

    /// Write the submitted code verbatim into the staging area.
    pub async fn stage_code(&self, code: &str) -> Result<()> {
        let path = self.staging.join(layout::CODE);
        tokio::fs::write(&path, code)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Read back the dispatcher's output files.
    pub async fn harvest(&self) -> Result<ExecutionOutput> {
        let read = |name: &'static str| {
            let path = self.staging.join(name);
            async move {
                tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        Ok(ExecutionOutput {
            stdout: read(layout::STDOUT).await?,
            stderr: read(layout::STDERR).await?,
        })
    }

    /// Remove the staging area. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.staging).await {
            warn!(id = %self.id, path = %self.staging.display(), error = %e, "Failed to remove staging area");
        } else {
            debug!(id = %self.id, "Removed staging area");
        }
    }
}

impl Drop for SandboxInstance {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Reached when the owning future was cancelled mid-flight. This
        // removes the tree synchronously and blocks the current runtime
        // worker until it is gone.
        if let Err(e) = std::fs::remove_dir_all(&self.staging) {
            warn!(id = %self.id, error = %e, "Failed to remove staging area on drop");
        }
    }
}

/// Recursively copy the contents of `from` into the existing directory `to`.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk template {}", from.display()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .context("Template entry outside template root")?;
        let dest = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
        } else {
            std::fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
