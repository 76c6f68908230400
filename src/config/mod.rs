//! Build configuration.
//!
//! A [`BuildConfig`] is constructed once per invocation, validated, and then
//! shared read-only as `Arc<BuildConfig>` with every phase and every worker
//! task. Nothing is passed through environment variables.
//!
//! # Configuration file
//!
//! JSON (`.json`) or TOML (`.toml`); relative paths resolve against the
//! directory containing the file.
//!
//! ```json
//! {
//!   "cache": "build-cache",
//!   "output": "build-output",
//!   "modules": [
//!     { "name": "Controls", "path": "src/Controls" },
//!     { "name": "Router", "path": "src/Router" }
//!   ],
//!   "minimize": true,
//!   "customPack": true,
//!   "urlServicePath": "/",
//!   "bundleOrder": "declaration"
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::BuilderError;

/// One interface module: a top-level namespace built from one source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Interface module name, also the first segment of every logical name it defines.
    pub name: String,
    /// Source directory of the module.
    pub path: PathBuf,
}

/// Tie-break among bundle specifications of equal priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleOrder {
    /// Specification files in sorted path order, entries in file order.
    #[default]
    Declaration,
    /// Sorted by bundle output path.
    Lexicographic,
}

/// Immutable configuration of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Cache directory holding the persisted store, graph and lock file.
    pub cache: PathBuf,
    /// Output root; nothing outside it is ever deleted.
    pub output: PathBuf,
    /// Interface modules to build.
    pub modules: Vec<ModuleConfig>,
    /// Emit `.min` siblings for scripts, styles and templates.
    #[serde(default)]
    pub minimize: bool,
    /// Run the custom packer over `*.package.json` specifications.
    #[serde(default = "default_true")]
    pub custom_pack: bool,
    /// Worker count override; defaults to CPU count minus one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Prefix of absolute urls produced when rebasing packed stylesheets.
    #[serde(default = "default_url_service_path")]
    pub url_service_path: String,
    /// Tie-break policy between bundle specifications.
    #[serde(default)]
    pub bundle_order: BundleOrder,
    /// Directory for the structured build report; defaults to the cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<PathBuf>,
    /// Restrict the build to these interface modules (patch build).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules_for_patch: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_url_service_path() -> String {
    "/".to_string()
}

impl BuildConfig {
    /// Create a configuration with default options.
    #[must_use]
    pub fn new(cache: PathBuf, output: PathBuf, modules: Vec<ModuleConfig>) -> Self {
        Self {
            cache,
            output,
            modules,
            minimize: false,
            custom_pack: true,
            max_workers: None,
            url_service_path: default_url_service_path(),
            bundle_order: BundleOrder::default(),
            logs: None,
            modules_for_patch: Vec::new(),
        }
    }

    /// Load and validate a configuration file.
    ///
    /// The format is chosen by extension: `.toml` is parsed as TOML, anything
    /// else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it fails
    /// [`validate`](Self::validate).
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read build config from {}", path.display()))?;

        let mut config: Self = if path.extension().is_some_and(|e| e == "toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse build config from {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse build config from {}", path.display()))?
        };

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.resolve_paths(&base);
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.cache);
        resolve(&mut self.output);
        if let Some(logs) = self.logs.as_mut() {
            resolve(logs);
        }
        for module in &mut self.modules {
            resolve(&mut module.path);
        }
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::ConfigError`] when there are no modules, module
    /// names are duplicated or contain separators, a patch module is unknown,
    /// or the cache directory lives inside the output root.
    pub fn validate(&self) -> Result<(), BuilderError> {
        let config_error = |message: String| BuilderError::ConfigError { message };

        if self.modules.is_empty() {
            return Err(config_error("at least one interface module is required".to_string()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for module in &self.modules {
            if module.name.is_empty() || module.name.contains(['/', '\\', '!']) {
                return Err(config_error(format!("invalid module name '{}'", module.name)));
            }
            if !seen.insert(module.name.as_str()) {
                return Err(config_error(format!("module '{}' is listed twice", module.name)));
            }
        }

        for name in &self.modules_for_patch {
            if !seen.contains(name.as_str()) {
                return Err(config_error(format!("patch module '{name}' is not configured")));
            }
        }

        if self.cache.starts_with(&self.output) {
            return Err(config_error(format!(
                "cache directory {} must not be inside the output root {}",
                self.cache.display(),
                self.output.display()
            )));
        }

        Ok(())
    }

    /// Directory the structured report is written to.
    #[must_use]
    pub fn logs_dir(&self) -> &Path {
        self.logs.as_deref().unwrap_or(&self.cache)
    }

    /// Whether this invocation is a patch build.
    #[must_use]
    pub fn is_patch(&self) -> bool {
        !self.modules_for_patch.is_empty()
    }

    /// Whether an interface module takes part in this invocation.
    #[must_use]
    pub fn is_in_scope(&self, module_name: &str) -> bool {
        !self.is_patch() || self.modules_for_patch.iter().any(|m| m == module_name)
    }

    /// Path-independent options compared between runs.
    ///
    /// Absolute paths, the worker count and the patch scope are left out, so
    /// renaming the workspace or patching a subset of modules keeps the cache.
    #[must_use]
    pub fn running_parameters(&self) -> serde_json::Value {
        let mut module_names: Vec<&str> = self.modules.iter().map(|m| m.name.as_str()).collect();
        module_names.sort_unstable();
        serde_json::json!({
            "modules": module_names,
            "minimize": self.minimize,
            "customPack": self.custom_pack,
            "urlServicePath": self.url_service_path,
            "bundleOrder": self.bundle_order,
        })
    }
}
