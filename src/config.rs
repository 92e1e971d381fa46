//! Host daemon configuration.
//!
//! Read as JSON from the optional `COMPILE_BOX_CONFIG` environment variable.
//! Every field has a default, so an absent variable or a partial document is
//! valid.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV: &str = "COMPILE_BOX_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Container runtime CLI (`docker`, `podman`, ...).
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Image with the toolchains and the dispatcher installed.
    #[serde(default = "default_image")]
    pub image: String,

    /// Boilerplate copied into every fresh staging area.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    /// Directory under which staging areas are created.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Staging area name prefix; the sandbox id is appended.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,

    /// Where the staging area is mounted inside the sandbox.
    #[serde(default = "default_mount_point")]
    pub mount_point: String,

    /// Dispatcher command inside the sandbox; the language tag is appended.
    #[serde(default = "default_dispatcher")]
    pub dispatcher: Vec<String>,

    /// Wall-clock bound on one sandbox run.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            image: default_image(),
            template_dir: default_template_dir(),
            staging_root: default_staging_root(),
            staging_prefix: default_staging_prefix(),
            mount_point: default_mount_point(),
            dispatcher: default_dispatcher(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from `COMPILE_BOX_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => {
                Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
            }
            Err(_) => {
                debug!("{CONFIG_ENV} not set, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        anyhow::ensure!(
            !config.dispatcher.is_empty(),
            "dispatcher command must not be empty"
        );
        anyhow::ensure!(config.timeout_seconds > 0, "timeout_seconds must be positive");
        Ok(config)
    }

    /// The wall-clock deadline for one sandbox run.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Host path of the staging area for sandbox `id`.
    pub fn staging_path(&self, id: &str) -> PathBuf {
        self.staging_root.join(format!("{}{id}", self.staging_prefix))
    }
}

fn default_runtime() -> String {
    "docker".into()
}

fn default_image() -> String {
    "compile-box".into()
}

fn default_template_dir() -> PathBuf {
    "./shared-dir".into()
}

fn default_staging_root() -> PathBuf {
    "/tmp".into()
}

fn default_staging_prefix() -> String {
    "compile-box-shared-".into()
}

fn default_mount_point() -> String {
    "/shared".into()
}

fn default_dispatcher() -> Vec<String> {
    vec!["compile-box-dispatch".into()]
}

const fn default_timeout() -> u64 {
    10
}
