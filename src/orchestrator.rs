//! Sandbox lifecycle orchestration on the host.
//!
//! One call to [`Orchestrator::execute`] provisions a uniquely named staging
//! area, stages the code, runs the isolated environment under a wall-clock
//! deadline, reads back the output, and removes the staging area on every
//! exit path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::backend::IsolationBackend;
use crate::config::Config;
use crate::error::ExecutionError;
use crate::pipeline::Language;
use crate::sandbox::{ExecutionOutput, RandomTokens, SandboxInstance, TokenSource};

/// A validated request: a supported language and the code to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: Language,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
        }
    }

    /// Validate raw boundary fields.
    pub fn from_parts(lang: Option<&str>, code: Option<&str>) -> Result<Self, ExecutionError> {
        let (Some(lang), Some(code)) = (lang, code) else {
            return Err(ExecutionError::Validation(
                r#"Missing required fields: "lang", "code""#.to_string(),
            ));
        };
        let language = lang
            .parse::<Language>()
            .map_err(|e| ExecutionError::UnsupportedLanguage(e.0))?;
        Ok(Self::new(language, code))
    }
}

/// Runs requests in disposable sandboxes.
pub struct Orchestrator<B, T = RandomTokens> {
    config: Arc<Config>,
    backend: B,
    tokens: T,
    deadline: Duration,
}

impl<B: IsolationBackend> Orchestrator<B> {
    /// Orchestrator with random sandbox ids and the configured deadline.
    pub fn new(config: Arc<Config>, backend: B) -> Self {
        Self::with_tokens(config, backend, RandomTokens)
    }
}

impl<B: IsolationBackend, T: TokenSource> Orchestrator<B, T> {
    pub fn with_tokens(config: Arc<Config>, backend: B, tokens: T) -> Self {
        let deadline = config.timeout();
        Self {
            config,
            backend,
            tokens,
            deadline,
        }
    }

    /// Override the wall-clock deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `request` in a fresh sandbox and return the program's output.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let id = self.tokens.next_token();
        info!(%id, language = %request.language, code_len = request.code.len(), "Running code");
        debug!(%id, code = %request.code, "Submitted code");

        let sandbox = SandboxInstance::provision(&self.config, id.clone(), self.deadline)
            .await
            .map_err(|e| {
                error!(%id, error = %format!("{e:#}"), "Failed to provision sandbox");
                ExecutionError::Infrastructure(format!("{e:#}"))
            })?;

        let result = self.run_in(&sandbox, request).await;
        sandbox.release().await;

        match &result {
            Ok(output) => info!(
                %id,
                stdout_len = output.stdout.len(),
                stderr_len = output.stderr.len(),
                "Finished"
            ),
            Err(e) => warn!(%id, error = %e, "Execution failed"),
        }
        result
    }

    #[instrument(skip_all, fields(id = %sandbox.id()))]
    async fn run_in(
        &self,
        sandbox: &SandboxInstance,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutput, ExecutionError> {
        sandbox
            .stage_code(&request.code)
            .await
            .map_err(|e| ExecutionError::Infrastructure(format!("{e:#}")))?;

        let launch = self.backend.launch(sandbox, request.language);
        match tokio::time::timeout(sandbox.deadline(), launch).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                if let Err(e) = self.backend.terminate(sandbox).await {
                    warn!(error = %e, "Failed to terminate timed-out sandbox");
                }
                return Err(ExecutionError::Timeout {
                    after: sandbox.deadline(),
                });
            }
        }

        sandbox
            .harvest()
            .await
            .map_err(|e| ExecutionError::Infrastructure(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandError;
    use crate::sandbox::{layout, FixedTokens};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// What the mock sandbox does once launched.
    #[derive(Clone)]
    enum Behavior {
        /// Echo the staged code back as stdout, like a `cat` program.
        EchoCode,
        /// Exit 1 without output, reporting `detail` on stdout.
        Abort(&'static str),
        /// Never finish.
        Hang,
        /// Exit 0 without writing output files.
        Silent,
    }

    struct MockBackend {
        behavior: Behavior,
        launched: Mutex<Vec<PathBuf>>,
        terminated: Mutex<Vec<String>>,
    }

    impl MockBackend {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                launched: Mutex::new(Vec::new()),
                terminated: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IsolationBackend for MockBackend {
        async fn launch(
            &self,
            sandbox: &SandboxInstance,
            _language: Language,
        ) -> Result<(), CommandError> {
            let dir = sandbox.staging_path().to_path_buf();
            self.launched.lock().unwrap().push(dir.clone());
            match &self.behavior {
                Behavior::EchoCode => {
                    let code = tokio::fs::read_to_string(dir.join(layout::CODE)).await.unwrap();
                    // Yield so concurrent requests interleave
                    tokio::task::yield_now().await;
                    tokio::fs::write(dir.join(layout::STDOUT), code).await.unwrap();
                    tokio::fs::write(dir.join(layout::STDERR), "").await.unwrap();
                    Ok(())
                }
                Behavior::Abort(detail) => Err(CommandError::Failed {
                    command: "mock run".into(),
                    exit_code: 1,
                    stdout: (*detail).to_string(),
                    stderr: String::new(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Behavior::Silent => Ok(()),
            }
        }

        async fn terminate(&self, sandbox: &SandboxInstance) -> Result<(), CommandError> {
            self.terminated.lock().unwrap().push(sandbox.container_name());
            Ok(())
        }
    }

    struct Fixture {
        root: tempfile::TempDir,
        _template: tempfile::TempDir,
        config: Arc<Config>,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let template = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            staging_root: root.path().to_path_buf(),
            template_dir: template.path().to_path_buf(),
            ..Config::default()
        });
        Fixture {
            root,
            _template: template,
            config,
        }
    }

    fn staging_dirs(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn request_requires_both_fields() {
        let err = ExecutionRequest::from_parts(None, Some("x")).unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
        let err = ExecutionRequest::from_parts(Some("py"), None).unwrap_err();
        assert_eq!(err.to_string(), r#"Missing required fields: "lang", "code""#);
    }

    #[test]
    fn request_rejects_unknown_language() {
        let err = ExecutionRequest::from_parts(Some("bc"), Some("1+1")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown language: bc");
        assert!(err.is_rejection());
    }

    #[test]
    fn request_accepts_empty_code() {
        let req = ExecutionRequest::from_parts(Some("py"), Some("")).unwrap();
        assert_eq!(req, ExecutionRequest::new(Language::Py, ""));
    }

    #[tokio::test]
    async fn success_returns_output_and_removes_staging() {
        let fx = fixture();
        let backend = MockBackend::new(Behavior::EchoCode);
        let orchestrator =
            Orchestrator::with_tokens(Arc::clone(&fx.config), backend, FixedTokens::new(["cafe"]));

        let output = orchestrator
            .execute(&ExecutionRequest::new(Language::Py, "hello"))
            .await
            .unwrap();

        assert_eq!(
            output,
            ExecutionOutput {
                stdout: "hello".into(),
                stderr: String::new()
            }
        );
        let launched = orchestrator.backend.launched.lock().unwrap().clone();
        assert_eq!(launched, vec![fx.config.staging_path("cafe")]);
        assert!(!launched[0].exists());
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }

    #[tokio::test]
    async fn sandbox_abort_surfaces_detail_and_removes_staging() {
        let fx = fixture();
        let backend = MockBackend::new(Behavior::Abort("code.c:1:1: error: unknown type name"));
        let orchestrator = Orchestrator::new(Arc::clone(&fx.config), backend);

        let err = orchestrator
            .execute(&ExecutionRequest::new(Language::C, "intt main"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Sandbox { exit_code: 1, .. }));
        assert!(err.to_string().contains("unknown type name"));
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }

    #[tokio::test]
    async fn timeout_terminates_and_removes_staging() {
        let fx = fixture();
        let backend = MockBackend::new(Behavior::Hang);
        let orchestrator =
            Orchestrator::with_tokens(Arc::clone(&fx.config), backend, FixedTokens::new(["loop"]))
                .with_deadline(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = orchestrator
            .execute(&ExecutionRequest::new(Language::Js, "while(true){}"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert_eq!(err.to_string(), "Execution timed out after 0.2s");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            *orchestrator.backend.terminated.lock().unwrap(),
            vec!["compile-box-loop".to_string()]
        );
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }

    #[tokio::test]
    async fn missing_output_files_is_infrastructure_failure() {
        let fx = fixture();
        let orchestrator = Orchestrator::new(Arc::clone(&fx.config), MockBackend::new(Behavior::Silent));

        let err = orchestrator
            .execute(&ExecutionRequest::new(Language::Ruby, "puts 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Infrastructure(_)));
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }

    #[tokio::test]
    async fn provisioning_failure_never_launches() {
        let fx = fixture();
        let config = Arc::new(Config {
            template_dir: "/nonexistent/template".into(),
            ..(*fx.config).clone()
        });
        let orchestrator = Orchestrator::new(config, MockBackend::new(Behavior::EchoCode));

        let err = orchestrator
            .execute(&ExecutionRequest::new(Language::Go, "package main"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Infrastructure(_)));
        assert!(orchestrator.backend.launched.lock().unwrap().is_empty());
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_staging_areas() {
        let fx = fixture();
        let orchestrator = Orchestrator::new(
            Arc::clone(&fx.config),
            MockBackend::new(Behavior::EchoCode),
        );

        let first = ExecutionRequest::new(Language::Py, "first");
        let second = ExecutionRequest::new(Language::Py, "second");
        let (a, b) = tokio::join!(orchestrator.execute(&first), orchestrator.execute(&second));

        assert_eq!(a.unwrap().stdout, "first");
        assert_eq!(b.unwrap().stdout, "second");
        let launched = orchestrator.backend.launched.lock().unwrap().clone();
        assert_eq!(launched.len(), 2);
        assert_ne!(launched[0], launched[1]);
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }

    #[tokio::test]
    async fn cancelled_execution_still_removes_staging() {
        let fx = fixture();
        let orchestrator =
            Orchestrator::new(Arc::clone(&fx.config), MockBackend::new(Behavior::Hang));

        let request = ExecutionRequest::new(Language::Perl, "sleep 100");
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), orchestrator.execute(&request)).await;

        assert!(cancelled.is_err());
        assert_eq!(orchestrator.backend.launched.lock().unwrap().len(), 1);
        assert_eq!(staging_dirs(fx.root.path()), 0);
    }
}
