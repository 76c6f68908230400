//! Build orchestration.
//!
//! One [`Builder::run`] is one build invocation:
//!
//! ```text
//! Init → LoadCache → ProcessSources → UpdateGraphAndStore → Minify → Pack
//!      → ReconcileOutput → PersistCache → Terminate
//! ```
//!
//! The coordinating task owns the dependency graph and the change store.
//! Workers only ever see a [`CompileInput`](crate::compiler::CompileInput)
//! and hand back a result, which is applied here in source-key order.
//!
//! A failing source never stops the run: it is recorded, reported and
//! retried next time. Anything else (lock contention, a bundle specification
//! error, an unwritable output) aborts the run. Either way the lock is
//! released and the report is written; the cache is only persisted by a run
//! that reaches `PersistCache`.

pub mod sources;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use sources::scan_sources;

use crate::cache::{BuildLock, CacheManager, LoadedCache, OutputMeta};
use crate::compiler::{CompileContext, CompilerRegistry};
use crate::config::BuildConfig;
use crate::constants::{BUILD_TIMINGS_FILE, PACKAGE_SPEC_SUFFIX, WORKER_POOL_CONFIG_FILE};
use crate::core::{BuilderError, interface_module_of};
use crate::graph::DependencyGraph;
use crate::packer::{
    CustomPacker, GeneratedFile, OutputDirSource, PackResults, collect_all_intersects, parse_spec_document,
    render_libraries, render_module_dependencies,
};
use crate::pool::{PoolConfig, WorkerPool};
use crate::report::BuildReport;
use crate::store::{ChangeStore, minified_path};
use crate::utils::fs::read_text_file;
use crate::utils::{ProgressBar, atomic_write_multiple, json_bytes, sha256_hex};
use sources::{MinifyJob, compile_all, minify_all};

/// Phases of a build run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildPhase {
    /// Lock acquisition
    Init,
    /// Reading the cache directory
    LoadCache,
    /// Scanning and compiling sources
    ProcessSources,
    /// Applying compile results and writing outputs
    UpdateGraphAndStore,
    /// Producing `.min` siblings
    Minify,
    /// Custom packing and metadata files
    Pack,
    /// Removing stale outputs
    ReconcileOutput,
    /// Writing the cache directory
    PersistCache,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::LoadCache => "load cache",
            Self::ProcessSources => "process sources",
            Self::UpdateGraphAndStore => "update graph and store",
            Self::Minify => "minify",
            Self::Pack => "pack",
            Self::ReconcileOutput => "reconcile output",
            Self::PersistCache => "persist cache",
        };
        f.write_str(name)
    }
}

/// Duration of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    /// Phase
    pub phase: BuildPhase,
    /// Wall-clock milliseconds
    pub millis: u64,
}

/// Per-phase durations, written to `build-timings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildTimings {
    /// Phases in the order they ran.
    pub phases: Vec<PhaseTiming>,
}

impl BuildTimings {
    fn record(&mut self, phase: BuildPhase, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        debug!(%phase, millis, "Phase finished");
        self.phases.push(PhaseTiming { phase, millis });
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    /// Whether the cache could not be used.
    pub first_build: bool,
    /// Sources compiled this run.
    pub processed: usize,
    /// Sources carried over unchanged.
    pub unchanged: usize,
    /// Sources that failed this run.
    pub failed_files: Vec<String>,
    /// Sources gone since the previous run.
    pub removed_sources: Vec<String>,
    /// Stale outputs deleted.
    pub deleted_outputs: Vec<String>,
    /// Bundles written by the custom packer.
    pub bundles: usize,
    /// Phase durations.
    pub timings: BuildTimings,
    /// Where the report was written, if it could be.
    pub report_path: Option<PathBuf>,
}

impl BuildOutcome {
    /// Process exit code: 1 when any source failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.failed_files.is_empty())
    }
}

/// Runs builds for one configuration.
#[derive(Debug, Clone)]
pub struct Builder {
    config: Arc<BuildConfig>,
    registry: Arc<CompilerRegistry>,
    progress: bool,
}

impl Builder {
    /// Builder with the built-in compilers.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::ConfigError`] for an invalid configuration.
    pub fn new(config: BuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(CompilerRegistry::with_builtins()?),
            progress: false,
        })
    }

    /// Replace the compiler registry.
    #[must_use]
    pub fn with_registry(mut self, registry: CompilerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Show a progress bar while sources compile.
    #[must_use]
    pub const fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// The configuration of this builder.
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run one build.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::LockHeld`] when another process owns the cache,
    /// or the error that aborted the run. Per-file failures are not errors;
    /// see [`BuildOutcome::failed_files`].
    pub async fn run(&self) -> Result<BuildOutcome> {
        let started = Instant::now();
        let lock = BuildLock::acquire(&self.config.cache).await?;
        let mut timings = BuildTimings::default();
        timings.record(BuildPhase::Init, started.elapsed());

        let mut report = BuildReport::new();
        let result = self.run_locked(&mut report, &mut timings).await;
        if let Err(e) = &result {
            match e.downcast_ref::<BuilderError>() {
                Some(builder_error) => report.builder_error(builder_error, None),
                None => report.error(format!("Build aborted: {e:#}"), None, None),
            }
        }

        let released = lock.release();
        if let Err(e) = &released {
            report.builder_error(e, None);
        }

        let report_path = match report.save(self.config.logs_dir()) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to write build report: {e:#}");
                None
            }
        };

        let mut outcome = result?;
        released?;
        outcome.report_path = report_path;
        info!(
            processed = outcome.processed,
            unchanged = outcome.unchanged,
            failed = outcome.failed_files.len(),
            "Build finished in {:.2}s: {}",
            started.elapsed().as_secs_f64(),
            report.summary()
        );
        Ok(outcome)
    }

    async fn run_locked(&self, report: &mut BuildReport, timings: &mut BuildTimings) -> Result<BuildOutcome> {
        let config = Arc::clone(&self.config);
        let cache = CacheManager::new(Arc::clone(&config));
        let mut outcome = BuildOutcome::default();

        let phase = Instant::now();
        let LoadedCache {
            mut store,
            mut graph,
            themes_meta,
            first_build_reason,
        } = cache.load(report).await?;
        outcome.first_build = first_build_reason.is_some();
        let patch = config.is_patch() && !outcome.first_build;
        if config.is_patch() && !patch {
            report.warning(
                "Patch build requested but the cache needs a full build; building every module",
                None,
                None,
            );
        }
        let in_scope = |path: &str| !patch || config.is_in_scope(interface_module_of(path));
        timings.record(BuildPhase::LoadCache, phase.elapsed());

        let phase = Instant::now();
        let (pool_config, pool_warning) = PoolConfig::resolve(config.max_workers);
        if let Some(warning) = &pool_warning {
            report.builder_error(warning, None);
        }
        let pool = WorkerPool::new(pool_config);

        let snapshot = scan_sources(&config.modules).await?;
        let output_root = config.output.clone();
        let statuses = store.classify_all(&snapshot, |output| output_root.join(output).exists());

        let mut work = Vec::new();
        for (path, status) in &statuses {
            if !in_scope(path) {
                continue;
            }
            if status.needs_processing() {
                debug!(file = %path, %status, "Source needs processing");
                work.push((path.clone(), snapshot[path]));
            } else {
                store.carry_over(path);
                outcome.unchanged += 1;
            }
        }
        if patch {
            store.carry_over_out_of_scope(|path| in_scope(path));
        }

        let context = Arc::new(CompileContext {
            module_roots: config.modules.iter().map(|m| (m.name.clone(), m.path.clone())).collect(),
        });
        let progress = ProgressBar::new(work.len() as u64, self.progress);
        progress.set_message("Compiling sources");
        outcome.processed = work.len();
        let compiled = compile_all(&pool, &self.registry, &context, work, &progress).await;
        progress.finish_and_clear();
        timings.record(BuildPhase::ProcessSources, phase.elapsed());

        let phase = Instant::now();
        for removed in store.removed_sources(&snapshot) {
            if !in_scope(&removed) {
                continue;
            }
            if let Some(record) = store.previous().input_paths.get(&removed) {
                for module in &record.modules {
                    if defined_elsewhere(&store, &graph, module, &removed).is_none() {
                        graph.remove_node(module);
                    }
                }
            }
            debug!(file = %removed, "Source removed");
            outcome.removed_sources.push(removed);
        }

        let mut writes = Vec::new();
        let mut minify_jobs = Vec::new();
        for compiled in compiled {
            let path = compiled.path;
            let module = interface_module_of(&path).to_string();
            let duplicate = compiled.result.as_ref().ok().and_then(|output| {
                output.nodes.iter().find_map(|(name, _)| {
                    defined_elsewhere(&store, &graph, name, &path).map(|owner| BuilderError::DuplicateModule {
                        path: path.clone(),
                        module: name.clone(),
                        owner: owner.to_string(),
                    })
                })
            });
            let output = match (compiled.result, duplicate) {
                (Ok(output), None) => output,
                (Err(e), _) | (Ok(_), Some(e)) => {
                    report.builder_error(&e, Some(module.as_str()));
                    store.mark_failed(&path, compiled.mtime);
                    outcome.failed_files.push(path);
                    continue;
                }
            };

            if let Some(record) = store.previous().input_paths.get(&path) {
                for name in &record.modules {
                    graph.clear_node(name);
                }
            }
            store.begin(&path, compiled.mtime);
            store.record_dependencies(&path, output.dependencies.iter().cloned());
            store.record_modules(&path, output.module_names());
            for file in output.outputs {
                store.record_output(&path, file.path.as_str());
                if config.minimize && file.minify {
                    match String::from_utf8(file.content.clone()) {
                        Ok(text) => minify_jobs.push(MinifyJob {
                            source: path.clone(),
                            min_path: minified_path(&file.path),
                            hash: sha256_hex(text.as_bytes()),
                            output: file.path.clone(),
                            text,
                        }),
                        Err(_) => report.warning(
                            format!("{} is not UTF-8 text; not minified", file.path),
                            Some(path.as_str()),
                            Some(module.as_str()),
                        ),
                    }
                }
                writes.push((config.output.join(&file.path), file.content));
            }
            for (name, node) in output.nodes {
                graph.set_node(name, node);
            }
            for (name, dependencies) in output.links {
                graph.set_link(name, dependencies);
            }
            for warning in output.warnings {
                report.warning(warning, Some(path.as_str()), Some(module.as_str()));
            }
        }
        atomic_write_multiple(writes).await.context("Failed to write compiled outputs")?;

        let dangling = graph.dangling_links();
        if !dangling.is_empty() {
            debug!(count = dangling.len(), "Dependency graph has links to unknown modules");
        }
        for cycle in graph.cycles() {
            debug!(modules = ?cycle, "Dependency cycle");
        }
        timings.record(BuildPhase::UpdateGraphAndStore, phase.elapsed());

        let phase = Instant::now();
        self.minify(&pool, &mut store, minify_jobs, report).await?;
        timings.record(BuildPhase::Minify, phase.elapsed());

        let phase = Instant::now();
        let mut generated: Vec<GeneratedFile> = Vec::new();
        if config.custom_pack {
            let spec_paths: Vec<String> = store
                .current()
                .input_paths
                .keys()
                .filter(|path| {
                    path.ends_with(PACKAGE_SPEC_SUFFIX) && !store.current().files_with_errors.contains(*path)
                })
                .cloned()
                .collect();
            let packer = CustomPacker::new(&config)?;
            let root = config.output.clone();
            let (returned, packed) =
                tokio::task::spawn_blocking(move || {
                    let packed = pack(&packer, &graph, &root, &spec_paths);
                    (graph, packed)
                })
                .await
                .context("Failed to spawn blocking task for custom packing")?;
            graph = returned;
            let results = packed?;
            for warning in &results.warnings {
                report.warning(warning.clone(), None, None);
            }
            outcome.bundles = results.packages.len();
            generated.extend(results.render()?);
            generated.extend(collect_all_intersects(&results)?);
        }
        generated.extend(render_libraries(&graph)?);
        generated.extend(render_module_dependencies(&graph, config.modules.iter().map(|m| m.name.as_str()))?);
        for (path, _) in &generated {
            store.record_generated(path.clone());
        }
        atomic_write_multiple(
            generated.into_iter().map(|(path, content)| (config.output.join(path), content)).collect(),
        )
        .await
        .context("Failed to write packer outputs")?;
        timings.record(BuildPhase::Pack, phase.elapsed());

        let phase = Instant::now();
        let filter = patch.then_some(config.modules_for_patch.as_slice());
        let previous_outputs = store.previous_output_files(filter);
        let current_outputs = store.current_output_files(filter);
        let summary = cache.reconcile_output_directory(&previous_outputs, &current_outputs, report).await?;
        outcome.deleted_outputs = summary.deleted;
        timings.record(BuildPhase::ReconcileOutput, phase.elapsed());

        let phase = Instant::now();
        let data = store.into_current();
        cache.save(&data, &graph, &OutputMeta::now(themes_meta)).await?;
        timings.record(BuildPhase::PersistCache, phase.elapsed());
        atomic_write_multiple(vec![
            (config.cache.join(BUILD_TIMINGS_FILE), json_bytes(&*timings)?),
            (config.cache.join(WORKER_POOL_CONFIG_FILE), json_bytes(pool.config())?),
        ])
        .await
        .context("Failed to write build debug info")?;

        outcome.timings = timings.clone();
        Ok(outcome)
    }

    async fn minify(
        &self,
        pool: &WorkerPool,
        store: &mut ChangeStore,
        jobs: Vec<MinifyJob>,
        report: &mut BuildReport,
    ) -> Result<()> {
        let output_root = &self.config.output;
        let mut pending = Vec::new();
        for job in jobs {
            let cached = store.minified_hash(&job.min_path) == Some(job.hash.as_str());
            if cached && output_root.join(&job.min_path).exists() {
                store.record_minified(job.min_path, job.hash);
            } else {
                pending.push(job);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let mut writes = Vec::new();
        for (job, result) in minify_all(pool, &self.registry, pending).await {
            let module = interface_module_of(&job.source).to_string();
            let text = match result {
                Ok(minified) => {
                    for error in &minified.errors {
                        report.warning(format!("Minification failed: {error}"), Some(job.source.as_str()), Some(module.as_str()));
                    }
                    minified.text
                }
                Err(e) => {
                    report.warning(format!("Minification failed: {e}"), Some(job.source.as_str()), Some(module.as_str()));
                    job.text
                }
            };
            writes.push((output_root.join(&job.min_path), text.into_bytes()));
            store.record_minified(job.min_path, job.hash);
        }
        atomic_write_multiple(writes).await.context("Failed to write minified outputs")
    }
}

/// Read every specification from the output root and run the packer.
fn pack(
    packer: &CustomPacker,
    graph: &DependencyGraph,
    root: &std::path::Path,
    spec_paths: &[String],
) -> Result<PackResults> {
    let mut specs = Vec::new();
    for path in spec_paths {
        let text = read_text_file(&root.join(path))?;
        specs.extend(parse_spec_document(path, &text)?);
    }
    let mut results = PackResults::default();
    packer.generate_all_custom_packages(specs, graph, &OutputDirSource::new(root), &mut results)?;
    Ok(results)
}

/// Source other than `path` that already defines `name` in this build.
///
/// Library sub-modules may also exist as standalone sources and are never
/// reported.
fn defined_elsewhere<'a>(
    store: &'a ChangeStore,
    graph: &DependencyGraph,
    name: &str,
    path: &str,
) -> Option<&'a str> {
    if graph.library_containing(name).is_some() {
        return None;
    }
    store.module_owner(name, path)
}
