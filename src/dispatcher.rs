//! In-sandbox dispatcher.
//!
//! Runs as the only process of the isolated environment. Looks up the
//! language's pipeline, executes its steps in order against the staging area,
//! and persists the program's stdout/stderr for the host to read back.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use crate::pipeline::{Pipeline, Registry};
use crate::resolver::{self, Introspector, Javap};
use crate::runner::{self, CommandError, RunOptions};
use crate::sandbox::{layout, ExecutionOutput};

/// Why the dispatcher aborted without writing output files.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    #[error("Compilation failed: {0}")]
    CompileFailure(#[source] CommandError),

    #[error("No main method found.")]
    EntryPointNotFound,

    #[error("Run step could not be started: {0}")]
    Launch(#[source] CommandError),

    #[error("Staging area i/o failed on {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Executes pipelines inside the staging area.
pub struct Dispatcher<I = Javap> {
    registry: Registry,
    shared_dir: PathBuf,
    introspector: I,
}

impl Dispatcher {
    /// Dispatcher over `shared_dir` with `javap`-based entry-point lookup.
    pub fn new(registry: Registry, shared_dir: impl Into<PathBuf>) -> Self {
        Self::with_introspector(registry, shared_dir, Javap::default())
    }
}

impl<I: Introspector> Dispatcher<I> {
    pub fn with_introspector(
        registry: Registry,
        shared_dir: impl Into<PathBuf>,
        introspector: I,
    ) -> Self {
        Self {
            registry,
            shared_dir: shared_dir.into(),
            introspector,
        }
    }

    /// Run the pipeline for `tag` and write the run step's output files.
    ///
    /// A run step that exits non-zero is not an error: its output is written
    /// like any other.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, tag: &str) -> Result<ExecutionOutput, DispatchError> {
        let (language, pipeline) = self
            .registry
            .lookup(tag)
            .ok_or_else(|| DispatchError::UnknownLanguage(tag.to_string()))?;

        info!(%language, "Running pipeline");
        let output = self.execute(pipeline).await?;

        self.persist(layout::STDOUT, &output.stdout).await?;
        self.persist(layout::STDERR, &output.stderr).await?;
        Ok(output)
    }

    async fn execute(&self, pipeline: &Pipeline) -> Result<ExecutionOutput, DispatchError> {
        let dir = self.shared_dir.to_string_lossy();
        let options = RunOptions::default();

        for step in pipeline.build_steps() {
            runner::run(&step.render(&dir, None), &options)
                .await
                .map_err(DispatchError::CompileFailure)?;
        }

        let entry_point = if pipeline.resolves_entry_point() {
            let units = resolver::discover_units(&self.shared_dir)
                .await
                .map_err(|source| DispatchError::Staging {
                    path: self.shared_dir.clone(),
                    source,
                })?;
            debug!(count = units.len(), "Scanning compiled units");
            let unit = resolver::resolve(&units, &self.shared_dir, &self.introspector)
                .await
                .ok_or(DispatchError::EntryPointNotFound)?;
            Some(unit.name)
        } else {
            None
        };

        let command = pipeline.run_step().render(&dir, entry_point.as_deref());
        match runner::run(&command, &options).await {
            Ok(out) => Ok(ExecutionOutput {
                stdout: out.stdout,
                stderr: out.stderr,
            }),
            Err(CommandError::Failed {
                exit_code,
                stdout,
                stderr,
                ..
            }) => {
                debug!(exit_code, "Program exited with failure");
                Ok(ExecutionOutput { stdout, stderr })
            }
            Err(e) => Err(DispatchError::Launch(e)),
        }
    }

    async fn persist(&self, name: &str, contents: &str) -> Result<(), DispatchError> {
        let path = self.shared_dir.join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| DispatchError::Staging { path, source })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::pipeline::Language;
    use crate::resolver::tests::FakeIntrospector;

    fn shared_with_code(code: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(layout::CODE), code).unwrap();
        dir
    }

    fn dispatcher(dir: &Path, language: Language, pipeline: Pipeline) -> Dispatcher {
        Dispatcher::new(std::iter::once((language, pipeline)).collect(), dir)
    }

    fn output_files_exist(dir: &Path) -> bool {
        dir.join(layout::STDOUT).exists() || dir.join(layout::STDERR).exists()
    }

    #[tokio::test]
    async fn interpreted_program_output_is_persisted() {
        let shared = shared_with_code("echo hello");
        let d = dispatcher(shared.path(), Language::Bash, Pipeline::interpret("sh {dir}/code"));

        let output = d.dispatch("bash").await.unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(
            std::fs::read_to_string(shared.path().join(layout::STDOUT)).unwrap(),
            "hello\n"
        );
        assert_eq!(
            std::fs::read_to_string(shared.path().join(layout::STDERR)).unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn build_steps_run_in_order() {
        let shared = shared_with_code("echo compiled");
        let pipeline = Pipeline::compile(
            &["mv {dir}/code {dir}/code.sh", "cp {dir}/code.sh {dir}/exec"],
            "sh {dir}/exec",
        );
        let d = dispatcher(shared.path(), Language::C, pipeline);

        let output = d.dispatch("c").await.unwrap();
        assert_eq!(output.stdout, "compiled\n");
        assert!(!shared.path().join(layout::CODE).exists());
    }

    #[tokio::test]
    async fn unknown_language_writes_nothing() {
        let shared = shared_with_code("echo hello");
        let d = dispatcher(shared.path(), Language::Bash, Pipeline::interpret("sh {dir}/code"));

        let err = d.dispatch("cobol").await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownLanguage(ref tag) if tag == "cobol"));

        // Supported tag, but this registry has no pipeline for it
        let err = d.dispatch("py").await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownLanguage(_)));
        assert!(!output_files_exist(shared.path()));
    }

    #[tokio::test]
    async fn compile_failure_aborts_with_compiler_stderr() {
        let shared = shared_with_code("int main( {");
        let pipeline = Pipeline::compile(
            &[
                "echo 'code.c:1: error: expected declaration' >&2; exit 1",
                "touch {dir}/second-step-ran",
            ],
            "touch {dir}/run-step-ran",
        );
        let d = dispatcher(shared.path(), Language::C, pipeline);

        let err = d.dispatch("c").await.unwrap_err();
        assert!(matches!(err, DispatchError::CompileFailure(_)));
        assert!(err.to_string().contains("expected declaration"));
        assert!(!shared.path().join("second-step-ran").exists());
        assert!(!shared.path().join("run-step-ran").exists());
        assert!(!output_files_exist(shared.path()));
    }

    #[tokio::test]
    async fn runtime_failure_still_persists_output() {
        let shared = shared_with_code("echo partial; echo boom >&2; exit 7");
        let d = dispatcher(shared.path(), Language::Bash, Pipeline::interpret("sh {dir}/code"));

        let output = d.dispatch("bash").await.unwrap();
        assert_eq!(output.stdout, "partial\n");
        assert_eq!(output.stderr, "boom\n");
        assert!(output_files_exist(shared.path()));
    }

    #[tokio::test]
    async fn resolved_entry_point_is_substituted() {
        let shared = shared_with_code("class Main {}");
        let pipeline = Pipeline::compile(
            &["touch {dir}/Helper.class {dir}/Main.class {dir}/Node.class"],
            "echo running {main}",
        )
        .resolving_entry_point();
        let registry = std::iter::once((Language::Java, pipeline)).collect();
        let d = Dispatcher::with_introspector(
            registry,
            shared.path(),
            FakeIntrospector::with_mains(&["Main"]),
        );

        let output = d.dispatch("java").await.unwrap();
        assert_eq!(output.stdout, "running Main\n");
    }

    #[tokio::test]
    async fn nested_class_entry_point_survives_the_shell() {
        let shared = shared_with_code("class Outer { static class Inner {} }");
        let pipeline = Pipeline::compile(
            &["touch {dir}/Outer.class '{dir}/Outer$Inner.class'"],
            "echo running {main}",
        )
        .resolving_entry_point();
        let registry = std::iter::once((Language::Java, pipeline)).collect();
        let d = Dispatcher::with_introspector(
            registry,
            shared.path(),
            FakeIntrospector::with_mains(&["Outer$Inner"]),
        );

        let output = d.dispatch("java").await.unwrap();
        assert_eq!(output.stdout, "running Outer$Inner\n");
    }

    #[tokio::test]
    async fn missing_entry_point_skips_run_step() {
        let shared = shared_with_code("class A {}");
        let pipeline = Pipeline::compile(
            &["touch {dir}/A.class {dir}/B.class {dir}/C.class"],
            "touch {dir}/run-step-ran",
        )
        .resolving_entry_point();
        let registry = std::iter::once((Language::Scala, pipeline)).collect();
        let d =
            Dispatcher::with_introspector(registry, shared.path(), FakeIntrospector::with_mains(&[]));

        let err = d.dispatch("scala").await.unwrap_err();
        assert!(matches!(err, DispatchError::EntryPointNotFound));
        assert!(!shared.path().join("run-step-ran").exists());
        assert!(!output_files_exist(shared.path()));
    }
}
