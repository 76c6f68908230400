//! Bundle specification documents (`*.package.json`).
//!
//! A document is one object or an array of objects:
//!
//! ```json
//! {
//!   "include": ["Controls/List/*", { "requiredBy": "Controls/Application" }],
//!   "exclude": ["css!Controls/List/Grid*"],
//!   "modules": ["Router"],
//!   "output": "Controls/list.package.min",
//!   "priority": true
//! }
//! ```
//!
//! `include` is required; its absence is reported when the bundle is
//! generated, so one bad entry does not hide problems in the others.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

use crate::constants::{PACKAGE_OUTPUT_SUFFIX, PACKAGE_SPEC_SUFFIX};
use crate::core::BuilderError;

/// One include or exclude rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleRule {
    /// Exact logical name, or a glob mask when it contains `*`, `?` or `[`.
    Name(String),
    /// The named module and everything it requires, transitively.
    RequiredBy {
        /// Root module
        #[serde(rename = "requiredBy")]
        required_by: String,
    },
}

impl ModuleRule {
    /// Whether this is a glob mask.
    #[must_use]
    pub fn is_mask(&self) -> bool {
        matches!(self, Self::Name(name) if name.contains(['*', '?', '[']))
    }
}

impl fmt::Display for ModuleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::RequiredBy { required_by } => write!(f, "requiredBy:{required_by}"),
        }
    }
}

/// Raw entry of a specification document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpecEntry {
    include: Option<Vec<ModuleRule>>,
    #[serde(default)]
    exclude: Vec<ModuleRule>,
    #[serde(default)]
    modules: Vec<String>,
    output: Option<String>,
    #[serde(default)]
    priority: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecDocument {
    Many(Vec<SpecEntry>),
    One(SpecEntry),
}

/// One bundle specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    /// Specification file, relative to the output root.
    pub source: String,
    /// Position of the entry within its file.
    pub index: usize,
    /// Bundle path relative to the output root, without `.js`/`.css`.
    pub output: String,
    /// Include rules; `None` when the entry has no `include` key.
    pub include: Option<Vec<ModuleRule>>,
    /// Exclude rules.
    pub exclude: Vec<ModuleRule>,
    /// Interface modules packed whole.
    pub modules: Vec<String>,
    /// Wins contended modules over non-priority specifications.
    pub priority: bool,
}

impl BundleSpec {
    /// Interface module that owns the bundle file.
    #[must_use]
    pub fn owner_module(&self) -> &str {
        self.output.split('/').next().unwrap_or_default()
    }

    /// Label used in diagnostics: the file, plus the entry index for arrays.
    #[must_use]
    pub fn label(&self) -> String {
        if self.index == 0 {
            self.source.clone()
        } else {
            format!("{}[{}]", self.source, self.index)
        }
    }
}

/// Default bundle path for entry `index` of the specification at `source`.
#[must_use]
pub fn default_output(source: &str, index: usize) -> String {
    let base = source.strip_suffix(PACKAGE_SPEC_SUFFIX).unwrap_or(source);
    if index == 0 {
        format!("{base}{PACKAGE_OUTPUT_SUFFIX}")
    } else {
        format!("{base}.{index}{PACKAGE_OUTPUT_SUFFIX}")
    }
}

/// Parse a specification document.
///
/// # Errors
///
/// Returns [`BuilderError::ConfigError`] when the text is not a valid
/// specification document.
pub fn parse_spec_document(source: &str, text: &str) -> Result<Vec<BundleSpec>, BuilderError> {
    let document: SpecDocument = serde_json::from_str(text).map_err(|e| BuilderError::ConfigError {
        message: format!("invalid bundle specification {source}: {e}"),
    })?;
    let entries = match document {
        SpecDocument::Many(entries) => entries,
        SpecDocument::One(entry) => vec![entry],
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let output = match entry.output {
                Some(output) => explicit_output(source, index, &output)?,
                None => default_output(source, index),
            };
            Ok(BundleSpec {
                source: source.to_string(),
                index,
                output,
                include: entry.include,
                exclude: entry.exclude,
                modules: entry.modules,
                priority: entry.priority,
            })
        })
        .collect()
}

/// An explicit `output`, relative to the output root. A leading `/` means the
/// output root itself; anything reaching outside it is rejected.
fn explicit_output(source: &str, index: usize, output: &str) -> Result<String, BuilderError> {
    let relative = output.trim_start_matches('/');
    let inside = Path::new(relative).components().all(|c| matches!(c, Component::Normal(_)));
    if relative.is_empty() || !inside {
        return Err(BuilderError::ConfigError {
            message: format!(
                "bundle specification {source}[{index}] has output '{output}' outside the output root"
            ),
        });
    }
    Ok(relative.to_string())
}
