//! Isolation backend trait and implementations.
//!
//! A backend starts the isolated environment for one sandbox instance and can
//! forcibly stop it. The environment runs the dispatcher against the staging
//! area; the backend itself never touches the staging area's contents.

mod container;

pub use container::ContainerBackend;

use async_trait::async_trait;

use crate::pipeline::Language;
use crate::runner::CommandError;
use crate::sandbox::SandboxInstance;

/// Trait for isolation backends.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Run the dispatcher for `language` inside an isolated environment bound
    /// to the sandbox's staging area, returning once it exits.
    ///
    /// The caller enforces the deadline by dropping this future; the
    /// environment's client process must not outlive it.
    async fn launch(&self, sandbox: &SandboxInstance, language: Language)
        -> Result<(), CommandError>;

    /// Forcibly stop the isolated environment after a missed deadline.
    async fn terminate(&self, sandbox: &SandboxInstance) -> Result<(), CommandError>;
}
