//! Incremental cache manager.
//!
//! Loads the change-detection store and the dependency graph from the cache
//! directory at the start of a run, persists them at the end, and removes
//! outputs the previous build produced but the current one did not.
//!
//! # Cache directory
//!
//! ```text
//! <cache>/
//! ├── builder-info.json              # { hashOfBuilder, startBuildTime }
//! ├── last_build_gulp_config.json    # running parameters of the previous run
//! ├── input-paths.json               # source → { mtime, output, dependencies, modules }
//! ├── dependencies.json              # source → consumed sources
//! ├── files-with-errors.json         # sources that failed last run
//! ├── cached-minified.json           # .min output → { hash }
//! ├── generated-outputs.json         # packer and meta files owned by no single source
//! ├── module-dependencies.json       # dependency graph
//! ├── themesMeta.json                # carried through untouched
//! └── builder.lockfile               # present while a build runs
//! ```
//!
//! # Recovery
//!
//! Every document is read independently. A missing document is simply empty;
//! a corrupt one is reported as a warning and treated as empty. A changed
//! builder version, changed running parameters, a missing dependency graph or
//! a corrupt store document make the whole run a first build, but the
//! previous output set is still used for reconciliation so no stale file
//! survives the rebuild. Only `cached-minified.json` and `themesMeta.json`
//! can be lost without a rebuild.

pub mod lock;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub use lock::BuildLock;

use crate::config::BuildConfig;
use crate::constants::{
    BUILDER_INFO_FILE, CACHE_FORMAT_VERSION, CACHED_MINIFIED_FILE, DEPENDENCIES_FILE,
    FILES_WITH_ERRORS_FILE, GENERATED_OUTPUTS_FILE, INPUT_PATHS_FILE, LAST_RUNNING_PARAMETERS_FILE,
    MODULE_DEPENDENCIES_FILE, THEMES_META_FILE,
};
use crate::core::BuilderError;
use crate::graph::DependencyGraph;
use crate::report::BuildReport;
use crate::store::{ChangeStore, MinifiedEntry, SourceRecord, StoreData};
use crate::utils::fs::{atomic_write_multiple, remove_file_and_empty_parents};
use crate::utils::{is_safe_path, json_bytes, read_json_file};

/// Contents of `builder-info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInfo {
    /// Identity of the builder that wrote the cache.
    pub hash_of_builder: String,
    /// RFC 3339 start time of the run that wrote the cache.
    pub start_build_time: String,
}

/// Identity of this builder: changes whenever the crate version or the cache
/// format changes.
#[must_use]
pub fn builder_hash() -> String {
    crate::utils::sha256_hex(
        format!("{}:{}:{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), CACHE_FORMAT_VERSION)
            .as_bytes(),
    )
}

/// Everything restored from the cache directory.
#[derive(Debug)]
pub struct LoadedCache {
    /// Change-detection store over the previous build.
    pub store: ChangeStore,
    /// Dependency graph of the previous build; empty on a first build.
    pub graph: DependencyGraph,
    /// `themesMeta.json`, carried through untouched.
    pub themes_meta: Option<serde_json::Value>,
    /// Why this is a first build, if it is one.
    pub first_build_reason: Option<String>,
}

/// Metadata saved alongside the store and graph.
#[derive(Debug, Clone)]
pub struct OutputMeta {
    /// Start time of the run being persisted.
    pub start_build_time: String,
    /// `themesMeta.json` to carry through.
    pub themes_meta: Option<serde_json::Value>,
}

impl OutputMeta {
    /// Meta stamped with the current time.
    #[must_use]
    pub fn now(themes_meta: Option<serde_json::Value>) -> Self {
        Self {
            start_build_time: Utc::now().to_rfc3339(),
            themes_meta,
        }
    }
}

/// Result of reconciling the output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Stale outputs removed, relative to the output root.
    pub deleted: Vec<String>,
    /// Stale outputs that could not be removed.
    pub failed: Vec<BuilderError>,
}

/// Summary printed by `cache info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    /// Cache directory inspected.
    pub cache_dir: PathBuf,
    /// Number of source records.
    pub records: usize,
    /// Number of outputs recorded, including minified and generated files.
    pub outputs: usize,
    /// Sources that failed in the last run.
    pub failed_files: Vec<String>,
    /// Nodes in the persisted dependency graph.
    pub graph_nodes: usize,
    /// Why the next run would be a first build, if it would.
    pub first_build_reason: Option<String>,
    /// Whether a lock file is present.
    pub locked: bool,
}

/// Loads, saves and reconciles the incremental cache of one configuration.
#[derive(Debug, Clone)]
pub struct CacheManager {
    config: Arc<BuildConfig>,
}

impl CacheManager {
    /// Manager for the cache directory of `config`.
    #[must_use]
    pub const fn new(config: Arc<BuildConfig>) -> Self {
        Self { config }
    }

    /// Cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache
    }

    fn document(&self, name: &str) -> PathBuf {
        self.config.cache.join(name)
    }

    /// Restore the store and graph of the previous build.
    ///
    /// The cache is always loaded whole. Patch scoping (`--patch`) is applied
    /// afterwards by `Builder::run_locked`, which classifies and reconciles
    /// only the patched modules' sources and carries the rest over untouched.
    ///
    /// # Errors
    ///
    /// Never fails on unreadable documents; only a failure to spawn the
    /// blocking read task is returned.
    pub async fn load(&self, report: &mut BuildReport) -> Result<LoadedCache> {
        let manager = self.clone();
        let (loaded, warnings) = tokio::task::spawn_blocking(move || manager.load_blocking())
            .await
            .context("Failed to spawn blocking task for cache load")?;

        for warning in &warnings {
            report.builder_error(warning, None);
        }
        if let Some(reason) = &loaded.first_build_reason {
            info!("Full build: {reason}");
        } else {
            debug!(
                records = loaded.store.previous().input_paths.len(),
                nodes = loaded.graph.node_count(),
                "Cache loaded"
            );
        }
        Ok(loaded)
    }

    fn load_blocking(&self) -> (LoadedCache, Vec<BuilderError>) {
        let mut warnings = Vec::new();

        let info: Option<BuilderInfo> = self.read_document(BUILDER_INFO_FILE, &mut warnings);
        let last_parameters: Option<serde_json::Value> =
            self.read_document(LAST_RUNNING_PARAMETERS_FILE, &mut warnings);

        // Any of these being unreadable leaves records that would classify
        // sources as unchanged without the state needed to skip them.
        let before_store = warnings.len();
        let input_paths: BTreeMap<String, SourceRecord> =
            self.read_document(INPUT_PATHS_FILE, &mut warnings).unwrap_or_default();
        let dependencies: BTreeMap<String, Vec<String>> =
            self.read_document(DEPENDENCIES_FILE, &mut warnings).unwrap_or_default();
        let files_with_errors: BTreeSet<String> =
            self.read_document(FILES_WITH_ERRORS_FILE, &mut warnings).unwrap_or_default();
        let generated: BTreeSet<String> =
            self.read_document(GENERATED_OUTPUTS_FILE, &mut warnings).unwrap_or_default();
        let graph: Option<DependencyGraph> = self.read_document(MODULE_DEPENDENCIES_FILE, &mut warnings);
        let store_corrupt = warnings.len() > before_store;

        let cached_minified: BTreeMap<String, MinifiedEntry> =
            self.read_document(CACHED_MINIFIED_FILE, &mut warnings).unwrap_or_default();
        let themes_meta: Option<serde_json::Value> =
            self.read_document(THEMES_META_FILE, &mut warnings);

        let mut previous = StoreData {
            input_paths,
            files_with_errors,
            cached_minified,
            generated,
        };
        previous.merge_dependencies(dependencies);

        let first_build_reason = match info {
            None => Some("no previous build found".to_string()),
            Some(info) if info.hash_of_builder != builder_hash() => {
                Some("the builder changed since the previous build".to_string())
            }
            Some(_) if last_parameters.as_ref() != Some(&self.config.running_parameters()) => {
                Some("build parameters changed since the previous build".to_string())
            }
            Some(_) if previous.input_paths.is_empty() => {
                Some("no source records in the cache".to_string())
            }
            Some(_) if store_corrupt => Some("the cache is corrupt".to_string()),
            Some(_) if graph.is_none() => {
                Some("the cache holds no dependency graph".to_string())
            }
            Some(_) => None,
        };

        let first_build = first_build_reason.is_some();
        let graph = if first_build { DependencyGraph::new() } else { graph.unwrap_or_default() };

        (
            LoadedCache {
                store: ChangeStore::new(previous, first_build),
                graph,
                themes_meta,
                first_build_reason,
            },
            warnings,
        )
    }

    fn read_document<T>(&self, name: &str, warnings: &mut Vec<BuilderError>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let path = self.document(name);
        if !path.exists() {
            return None;
        }
        match read_json_file(&path) {
            Ok(value) => Some(value),
            Err(e) => {
                warnings.push(BuilderError::CacheCorrupted {
                    file: path.display().to_string(),
                    reason: format!("{e:#}"),
                });
                None
            }
        }
    }

    /// Persist the store, graph and metadata of a completed run.
    ///
    /// # Errors
    ///
    /// Returns an error listing every document that could not be written.
    pub async fn save(&self, store: &StoreData, graph: &DependencyGraph, meta: &OutputMeta) -> Result<()> {
        let info = BuilderInfo {
            hash_of_builder: builder_hash(),
            start_build_time: meta.start_build_time.clone(),
        };

        let mut files = vec![
            (self.document(BUILDER_INFO_FILE), json_bytes(&info)?),
            (self.document(LAST_RUNNING_PARAMETERS_FILE), json_bytes(&self.config.running_parameters())?),
            (self.document(INPUT_PATHS_FILE), json_bytes(&store.input_paths)?),
            (self.document(DEPENDENCIES_FILE), json_bytes(&store.dependencies())?),
            (self.document(FILES_WITH_ERRORS_FILE), json_bytes(&store.files_with_errors)?),
            (self.document(CACHED_MINIFIED_FILE), json_bytes(&store.cached_minified)?),
            (self.document(GENERATED_OUTPUTS_FILE), json_bytes(&store.generated)?),
            (self.document(MODULE_DEPENDENCIES_FILE), json_bytes(graph)?),
        ];
        if let Some(themes_meta) = &meta.themes_meta {
            files.push((self.document(THEMES_META_FILE), json_bytes(themes_meta)?));
        }

        atomic_write_multiple(files).await.context("Failed to persist build cache")?;
        debug!(records = store.input_paths.len(), nodes = graph.node_count(), "Cache saved");
        Ok(())
    }

    /// Delete every output in `previous` that is not in `current`.
    ///
    /// Both sets are relative to the output root and must be complete before
    /// this is called. Paths resolving outside the output root are never
    /// touched. Failures are reported and returned, not raised.
    ///
    /// # Errors
    ///
    /// Only fails if the blocking delete task cannot be joined.
    pub async fn reconcile_output_directory(
        &self,
        previous: &BTreeSet<String>,
        current: &BTreeSet<String>,
        report: &mut BuildReport,
    ) -> Result<ReconcileSummary> {
        let stale: Vec<String> = previous.difference(current).cloned().collect();
        if stale.is_empty() {
            return Ok(ReconcileSummary::default());
        }

        let output = self.config.output.clone();
        let summary = tokio::task::spawn_blocking(move || {
            let mut summary = ReconcileSummary::default();
            for relative in stale {
                let full = output.join(&relative);
                if !is_safe_path(&output, &full) {
                    summary.failed.push(BuilderError::PathEscapesOutput {
                        path: relative,
                        root: output.display().to_string(),
                    });
                    continue;
                }
                match remove_file_and_empty_parents(&full, &output) {
                    Ok(()) => summary.deleted.push(relative),
                    Err(e) => summary.failed.push(BuilderError::DeleteFailed {
                        path: relative,
                        reason: e.to_string(),
                    }),
                }
            }
            summary
        })
        .await
        .context("Failed to spawn blocking task for output reconciliation")?;

        for deleted in &summary.deleted {
            debug!(file = %deleted, "Removed stale output");
        }
        for failure in &summary.failed {
            report.builder_error(failure, None);
        }
        if !summary.deleted.is_empty() {
            info!("Removed {} stale output(s)", summary.deleted.len());
        }
        Ok(summary)
    }

    /// Inspect the cache without modifying it.
    ///
    /// # Errors
    ///
    /// Only fails if the blocking read task cannot be joined.
    pub async fn info(&self) -> Result<CacheInfo> {
        let manager = self.clone();
        let (loaded, _) = tokio::task::spawn_blocking(move || manager.load_blocking())
            .await
            .context("Failed to spawn blocking task for cache info")?;

        let previous = loaded.store.previous();
        Ok(CacheInfo {
            cache_dir: self.config.cache.clone(),
            records: previous.input_paths.len(),
            outputs: loaded.store.previous_output_files(None).len(),
            failed_files: previous.files_with_errors.iter().cloned().collect(),
            graph_nodes: loaded.graph.node_count(),
            first_build_reason: loaded.first_build_reason,
            locked: lock::is_locked(&self.config.cache),
        })
    }

    /// Remove the cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::LockHeld`] while a build holds the cache, or an
    /// I/O error if the directory cannot be removed.
    pub async fn clean(&self) -> Result<bool> {
        let cache = &self.config.cache;
        if lock::is_locked(cache) {
            return Err(BuilderError::LockHeld {
                path: cache.join(crate::constants::LOCK_FILE).display().to_string(),
            }
            .into());
        }
        if !cache.exists() {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(cache)
            .await
            .with_context(|| format!("Failed to remove cache directory: {}", cache.display()))?;
        info!(path = %cache.display(), "Cache removed");
        Ok(true)
    }
}
