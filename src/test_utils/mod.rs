//! Test utilities for wsbuild
//!
//! Helpers for writing tests against a real directory layout:
//!
//! - [`init_test_logging`] - tracing output for tests, enabled on demand
//! - [`TestWorkspace`] - a temporary workspace with interface modules, an
//!   output root and a cache directory
//!
//! # Example
//!
//! ```rust,no_run
//! use wsbuild::test_utils::TestWorkspace;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let ws = TestWorkspace::new(&["Controls"])?;
//! ws.write_source("Controls/Button.js", "define('Controls/Button', [], function () {});")?;
//!
//! let outcome = wsbuild::orchestrator::Builder::new(ws.config())?.run().await?;
//! assert_eq!(outcome.processed, 1);
//! assert!(ws.output_exists("Controls/Button.js"));
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{BuildConfig, ModuleConfig};
use crate::graph::DependencyGraph;
use crate::utils::read_json_file;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`. With neither, tests run
/// without a subscriber.
///
/// ```bash
/// RUST_LOG=wsbuild=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// A temporary workspace laid out as `src/<Module>`, `out/` and `cache/`.
///
/// Source keys (`Module/relative/path`) are used everywhere so tests read
/// like the logical names they exercise.
#[derive(Debug)]
pub struct TestWorkspace {
    temp: TempDir,
    modules: Vec<String>,
}

impl TestWorkspace {
    /// Create the workspace with an empty source directory per module.
    ///
    /// # Errors
    ///
    /// Fails if the temporary directory cannot be created.
    pub fn new(modules: &[&str]) -> Result<Self> {
        let temp = TempDir::new().context("Failed to create temp workspace")?;
        for module in modules {
            std::fs::create_dir_all(temp.path().join("src").join(module))?;
        }
        Ok(Self {
            temp,
            modules: modules.iter().map(|m| (*m).to_string()).collect(),
        })
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Output root.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root().join("out")
    }

    /// Cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root().join("cache")
    }

    /// Absolute path of a source key.
    #[must_use]
    pub fn source_path(&self, key: &str) -> PathBuf {
        self.root().join("src").join(key)
    }

    /// Build configuration with minification disabled and packing enabled.
    #[must_use]
    pub fn config(&self) -> BuildConfig {
        BuildConfig::new(
            self.cache_dir(),
            self.output_dir(),
            self.modules
                .iter()
                .map(|name| ModuleConfig {
                    name: name.clone(),
                    path: self.root().join("src").join(name),
                })
                .collect(),
        )
    }

    /// Write (or overwrite) a source file and move its mtime forward so the
    /// change is seen even within the same millisecond.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error.
    pub fn write_source(&self, key: &str, content: &str) -> Result<()> {
        let path = self.source_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existed = path.exists();
        std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        if existed {
            self.touch(key)?;
        }
        Ok(())
    }

    /// Move a source file's modification time one second forward.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error.
    pub fn touch(&self, key: &str) -> Result<()> {
        let path = self.source_path(key);
        let current = std::fs::metadata(&path)?.modified()?;
        let bumped = current.max(SystemTime::now()) + Duration::from_secs(1);
        let file = std::fs::File::options().write(true).open(&path)?;
        file.set_modified(bumped)?;
        Ok(())
    }

    /// Delete a source file.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error.
    pub fn remove_source(&self, key: &str) -> Result<()> {
        std::fs::remove_file(self.source_path(key))?;
        Ok(())
    }

    /// Rename a source file.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error.
    pub fn rename_source(&self, from: &str, to: &str) -> Result<()> {
        let target = self.source_path(to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(self.source_path(from), target)?;
        Ok(())
    }

    /// Whether a file exists under the output root.
    #[must_use]
    pub fn output_exists(&self, path: &str) -> bool {
        self.output_dir().join(path).exists()
    }

    /// Read a text file under the output root.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing.
    pub fn read_output(&self, path: &str) -> Result<String> {
        let full = self.output_dir().join(path);
        std::fs::read_to_string(&full).with_context(|| format!("Failed to read {}", full.display()))
    }

    /// Parse a JSON file under the output root.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or not valid JSON.
    pub fn read_output_json(&self, path: &str) -> Result<serde_json::Value> {
        read_json_file(&self.output_dir().join(path))
    }

    /// The dependency graph persisted by the last run.
    ///
    /// # Errors
    ///
    /// Fails if the cache holds no graph.
    pub fn persisted_graph(&self) -> Result<DependencyGraph> {
        read_json_file(&self.cache_dir().join(crate::constants::MODULE_DEPENDENCIES_FILE))
    }
}
