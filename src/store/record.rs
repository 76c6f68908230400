//! Persisted records of the change-detection store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What the previous build knew about one source file.
///
/// Paths are `/`-separated and relative: sources to the parent of their
/// interface module directory (`Controls/Button/Button.less`), outputs to the
/// output root. Nothing absolute is stored, so moving the workspace keeps
/// records matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    /// Output files produced from this source.
    #[serde(default)]
    pub output: Vec<String>,
    /// Source files this one consumes (imports, partials).
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Logical module names this source defines.
    #[serde(default)]
    pub modules: Vec<String>,
}

/// Entry of `cached-minified.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinifiedEntry {
    /// SHA-256 of the unminified text the `.min` file was produced from.
    pub hash: String,
}

/// Everything the store persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreData {
    /// `input-paths.json`
    pub input_paths: BTreeMap<String, SourceRecord>,
    /// `files-with-errors.json`
    pub files_with_errors: BTreeSet<String>,
    /// `cached-minified.json`
    pub cached_minified: BTreeMap<String, MinifiedEntry>,
    /// `generated-outputs.json`: packer metadata not owned by any single source.
    pub generated: BTreeSet<String>,
}

impl StoreData {
    /// `dependencies.json` view: source → dependency sources, non-empty lists only.
    #[must_use]
    pub fn dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.input_paths
            .iter()
            .filter(|(_, record)| !record.dependencies.is_empty())
            .map(|(path, record)| (path.clone(), record.dependencies.clone()))
            .collect()
    }

    /// Fill dependency lists missing from `input-paths.json` from `dependencies.json`.
    pub fn merge_dependencies(&mut self, dependencies: BTreeMap<String, Vec<String>>) {
        for (path, deps) in dependencies {
            if let Some(record) = self.input_paths.get_mut(&path)
                && record.dependencies.is_empty()
            {
                record.dependencies = deps;
            }
        }
    }
}

/// Why a source with a prior record has to be processed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    /// Modification time differs from the recorded one.
    Modified,
    /// The previous attempt failed.
    PreviouslyFailed,
    /// A consumed source changed, appeared, or disappeared.
    DependencyChanged(String),
    /// A recorded output is missing from disk.
    OutputMissing,
}

/// Classification of one source file against the previous build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Reuse the previous outputs without compiling.
    Unchanged,
    /// Has a prior record but must be rebuilt.
    Changed(ChangeReason),
    /// No prior record.
    New,
}

impl FileStatus {
    /// Whether the file has to go through a compiler.
    #[must_use]
    pub const fn needs_processing(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::New => f.write_str("new"),
            Self::Changed(ChangeReason::Modified) => f.write_str("changed"),
            Self::Changed(ChangeReason::PreviouslyFailed) => f.write_str("changed (previously failed)"),
            Self::Changed(ChangeReason::DependencyChanged(dep)) => {
                write!(f, "changed (dependency {dep})")
            }
            Self::Changed(ChangeReason::OutputMissing) => f.write_str("changed (output missing)"),
        }
    }
}
