//! Language pipeline registry.
//!
//! Maps each supported language to the ordered build/run steps that take the
//! staged `code` file to captured program output. The set of languages is
//! closed: anything that does not parse into [`Language`] has no pipeline.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A supported language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Js,
    Py,
    C,
    Cpp,
    Java,
    Bash,
    Rust,
    Php,
    Ruby,
    Go,
    Scala,
    Perl,
    Golfscript,
    Fish,
}

impl Language {
    /// Every supported language, in registration order.
    pub const ALL: [Self; 14] = [
        Self::Js,
        Self::Py,
        Self::C,
        Self::Cpp,
        Self::Java,
        Self::Bash,
        Self::Rust,
        Self::Php,
        Self::Ruby,
        Self::Go,
        Self::Scala,
        Self::Perl,
        Self::Golfscript,
        Self::Fish,
    ];

    /// The wire tag for this language.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Py => "py",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
            Self::Bash => "bash",
            Self::Rust => "rust",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Go => "go",
            Self::Scala => "scala",
            Self::Perl => "perl",
            Self::Golfscript => "golfscript",
            Self::Fish => "fish",
        }
    }

    /// The steps that build and run code written in this language.
    pub fn pipeline(self) -> Pipeline {
        match self {
            Self::Js => Pipeline::interpret("node {dir}/code"),
            Self::Py => Pipeline::interpret("python3 {dir}/code"),
            Self::C => Pipeline::compile(
                &["mv {dir}/code {dir}/code.c", "gcc -o {dir}/exec {dir}/code.c"],
                "{dir}/exec",
            ),
            Self::Cpp => Pipeline::compile(
                &["mv {dir}/code {dir}/code.cpp", "g++ -o {dir}/exec {dir}/code.cpp"],
                "{dir}/exec",
            ),
            Self::Java => Pipeline::compile(
                &["mv {dir}/code {dir}/code.java", "java/bin/javac {dir}/code.java"],
                "java/bin/java -cp {dir} {main}",
            )
            .resolving_entry_point(),
            Self::Bash => Pipeline::interpret("chmod a+x {dir}/code && bash {dir}/code"),
            Self::Rust => Pipeline::compile(
                &[
                    "mv {dir}/code {dir}/code.rs",
                    "~/.cargo/bin/rustc {dir}/code.rs -o {dir}/exec",
                ],
                "{dir}/exec",
            ),
            Self::Php => Pipeline::interpret("php {dir}/code"),
            Self::Ruby => Pipeline::interpret("ruby {dir}/code"),
            Self::Go => Pipeline::compile(
                &[
                    "mv {dir}/code {dir}/code.go",
                    "cd {dir} && go build -o exec code.go",
                ],
                "{dir}/exec",
            ),
            Self::Scala => Pipeline::compile(
                &["mv {dir}/code {dir}/code.scala", "cd {dir} && scalac code.scala"],
                "scala -cp {dir} {main}",
            )
            .resolving_entry_point(),
            Self::Perl => Pipeline::interpret("perl {dir}/code"),
            Self::Golfscript => Pipeline::interpret("golfscript {dir}/code"),
            Self::Fish => Pipeline::interpret("python3 {dir}/fish.py {dir}/code"),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when a tag names no supported language.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.tag() == s)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// What a failing step means for the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// A build step: a non-zero exit aborts the pipeline.
    Abort,
    /// The run step: its output is the result whatever the exit status.
    Capture,
}

/// One command template in a pipeline.
///
/// Templates are shell command lines. `{dir}` expands to the staging area as
/// seen from inside the sandbox; `{main}` to the resolved entry point,
/// single-quoted so nested class names such as `Outer$Inner` reach the
/// program unexpanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub template: &'static str,
    pub on_failure: OnFailure,
}

impl Step {
    /// Expand the template placeholders.
    pub fn render(&self, dir: &str, entry_point: Option<&str>) -> String {
        let command = self.template.replace("{dir}", dir);
        match entry_point {
            Some(main) => command.replace("{main}", &format!("'{main}'")),
            None => command,
        }
    }
}

/// Ordered build/run steps for one language.
///
/// Always ends with exactly one [`OnFailure::Capture`] step. When
/// `resolve_entry_point` is set, entry-point resolution runs between the last
/// build step and the run step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    steps: Vec<Step>,
    resolve_entry_point: bool,
}

impl Pipeline {
    /// A single step running the interpreter on the code file.
    pub fn interpret(run: &'static str) -> Self {
        Self::compile(&[], run)
    }

    /// Build steps in order, then the run step.
    pub fn compile(build: &[&'static str], run: &'static str) -> Self {
        let mut steps: Vec<Step> = build
            .iter()
            .map(|&template| Step {
                template,
                on_failure: OnFailure::Abort,
            })
            .collect();
        steps.push(Step {
            template: run,
            on_failure: OnFailure::Capture,
        });
        Self {
            steps,
            resolve_entry_point: false,
        }
    }

    /// Resolve the entry point among compiled units before running.
    #[must_use]
    pub fn resolving_entry_point(mut self) -> Self {
        self.resolve_entry_point = true;
        self
    }

    /// The build steps, in execution order.
    pub fn build_steps(&self) -> &[Step] {
        &self.steps[..self.steps.len() - 1]
    }

    /// The final run step.
    pub fn run_step(&self) -> &Step {
        &self.steps[self.steps.len() - 1]
    }

    pub const fn resolves_entry_point(&self) -> bool {
        self.resolve_entry_point
    }
}

/// Immutable language → pipeline table, built once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    pipelines: HashMap<Language, Pipeline>,
}

impl Registry {
    /// The pipelines for every supported language.
    pub fn builtin() -> Self {
        Language::ALL
            .into_iter()
            .map(|lang| (lang, lang.pipeline()))
            .collect()
    }

    /// Look up the pipeline for a tag. `None` for unknown tags or languages
    /// this registry was built without.
    pub fn lookup(&self, tag: &str) -> Option<(Language, &Pipeline)> {
        let language = tag.parse::<Language>().ok()?;
        self.pipelines.get(&language).map(|p| (language, p))
    }
}

impl FromIterator<(Language, Pipeline)> for Registry {
    fn from_iter<T: IntoIterator<Item = (Language, Pipeline)>>(iter: T) -> Self {
        Self {
            pipelines: iter.into_iter().collect(),
        }
    }
}
