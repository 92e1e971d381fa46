//! Entry-point resolution for class-file languages.
//!
//! A compile step may leave several `.class` files behind. The runtime needs
//! the name of the one declaring `public static void main(String[])`.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::runner::{self, RunOptions};

/// The signature `javap -public` prints for a runnable entry point.
pub const MAIN_SIGNATURE: &str = "public static void main(java.lang.String[])";

const CLASS_SUFFIX: &str = ".class";

/// A compiled class file, named by its class name (file name sans `.class`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompiledUnit {
    pub name: String,
}

impl CompiledUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Inspects a compiled unit's public signatures.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Whether `unit` in `dir` declares a runnable `main`.
    async fn exposes_main(&self, dir: &Path, unit: &CompiledUnit) -> bool;
}

/// Introspection through the JDK's `javap`.
#[derive(Debug, Clone)]
pub struct Javap {
    program: String,
}

impl Javap {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Javap {
    fn default() -> Self {
        Self::new("java/bin/javap")
    }
}

#[async_trait]
impl Introspector for Javap {
    async fn exposes_main(&self, dir: &Path, unit: &CompiledUnit) -> bool {
        let command = format!(
            "{} -cp '{}' -public '{}'",
            self.program,
            dir.display(),
            unit.name
        );
        match runner::run(&command, &RunOptions::default()).await {
            Ok(output) => output.stdout.contains(MAIN_SIGNATURE),
            Err(e) => {
                debug!(unit = %unit.name, error = %e, "Introspection failed, skipping unit");
                false
            }
        }
    }
}

/// List the compiled units in `dir`, sorted by name.
///
/// Sorting pins the scan order so "first match wins" does not depend on the
/// filesystem's directory order.
pub async fn discover_units(dir: &Path) -> std::io::Result<Vec<CompiledUnit>> {
    let mut units = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(class) = name.strip_suffix(CLASS_SUFFIX) {
            if !class.is_empty() {
                units.push(CompiledUnit::new(class));
            }
        }
    }
    units.sort();
    Ok(units)
}

/// Return the first unit exposing `main`, or `None`.
pub async fn resolve<I: Introspector + ?Sized>(
    units: &[CompiledUnit],
    dir: &Path,
    introspector: &I,
) -> Option<CompiledUnit> {
    for unit in units {
        if introspector.exposes_main(dir, unit).await {
            debug!(unit = %unit.name, "Found entry point");
            return Some(unit.clone());
        }
    }
    None
}
