//! Source discovery and the parallel compile and minify phases.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

use crate::compiler::{CompileContext, CompileInput, CompileOutput, CompilerRegistry, MinifyOutput};
use crate::config::ModuleConfig;
use crate::constants::MINIFY_TIMEOUT;
use crate::core::{BuilderError, SourceKind, unixify};
use crate::pool::WorkerPool;
use crate::store::SourceSnapshot;
use crate::utils::ProgressBar;
use crate::utils::fs::modified_millis;

/// Walk every module's source directory and record modification times.
///
/// Hidden files and directories are skipped. Keys are `Module/relative/path`.
///
/// # Errors
///
/// Returns [`BuilderError::ConfigError`] when a module directory is missing,
/// or an I/O error when the walk fails.
pub async fn scan_sources(modules: &[ModuleConfig]) -> Result<SourceSnapshot> {
    let modules = modules.to_vec();
    tokio::task::spawn_blocking(move || scan_blocking(&modules))
        .await
        .context("Failed to spawn blocking task for source scan")?
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn scan_blocking(modules: &[ModuleConfig]) -> Result<SourceSnapshot> {
    let mut snapshot = SourceSnapshot::new();
    for module in modules {
        if !module.path.is_dir() {
            return Err(BuilderError::ConfigError {
                message: format!(
                    "source directory of module '{}' does not exist: {}",
                    module.name,
                    module.path.display()
                ),
            }
            .into());
        }

        let walker = WalkDir::new(&module.path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {}", module.path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&module.path).with_context(|| {
                format!("{} is not inside {}", entry.path().display(), module.path.display())
            })?;
            let key = format!("{}/{}", module.name, unixify(relative));
            snapshot.insert(key, modified_millis(entry.path())?);
        }
    }
    Ok(snapshot)
}

/// Outcome of compiling one source.
#[derive(Debug)]
pub struct CompiledSource {
    /// Source key.
    pub path: String,
    /// Modification time seen by the scan.
    pub mtime: i64,
    /// Compiler result or the per-file error.
    pub result: Result<CompileOutput, BuilderError>,
}

/// Compile `work` on the pool, keeping at most `max_in_flight` tasks queued.
///
/// Results are sorted by source key so callers apply them in the same order
/// whatever the completion order was.
pub async fn compile_all(
    pool: &WorkerPool,
    registry: &Arc<CompilerRegistry>,
    context: &Arc<CompileContext>,
    work: Vec<(String, i64)>,
    progress: &ProgressBar,
) -> Vec<CompiledSource> {
    let limit = pool.config().max_in_flight();
    let mut compiled: Vec<CompiledSource> = stream::iter(work)
        .map(|(path, mtime)| {
            let registry = Arc::clone(registry);
            let context = Arc::clone(context);
            let progress = progress.clone();
            async move {
                let result = compile_one(pool, &registry, context, &path).await;
                progress.inc(1);
                CompiledSource { path, mtime, result }
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    compiled.sort_by(|a, b| a.path.cmp(&b.path));
    compiled
}

async fn compile_one(
    pool: &WorkerPool,
    registry: &CompilerRegistry,
    context: Arc<CompileContext>,
    path: &str,
) -> Result<CompileOutput, BuilderError> {
    let failed = |message: String| BuilderError::CompileFailed {
        path: path.to_string(),
        message,
    };

    let kind = SourceKind::from_path(path);
    let compiler =
        registry.get(kind).ok_or_else(|| failed(format!("no compiler registered for {kind} sources")))?;
    let source_path =
        context.source_path(path).ok_or_else(|| failed("not inside a configured module".to_string()))?;

    let task = compiler.task_name();
    let timeout = compiler.timeout();
    let key = path.to_string();
    pool.exec(task, path, timeout, move || {
        let content = std::fs::read(&source_path)
            .with_context(|| format!("Failed to read {}", source_path.display()))?;
        compiler.compile(&CompileInput {
            path: key,
            kind,
            content,
            context,
        })
    })
    .await
}

/// A compiled text output waiting for its `.min` sibling.
#[derive(Debug, Clone)]
pub struct MinifyJob {
    /// Source that produced the output.
    pub source: String,
    /// Output path relative to the output root.
    pub output: String,
    /// `.min` sibling path.
    pub min_path: String,
    /// Unminified text.
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Minify every job on the pool. Results are sorted by output path.
pub async fn minify_all(
    pool: &WorkerPool,
    registry: &CompilerRegistry,
    jobs: Vec<MinifyJob>,
) -> Vec<(MinifyJob, Result<MinifyOutput, BuilderError>)> {
    let limit = pool.config().max_in_flight();
    let minifier = registry.minifier();
    let mut minified: Vec<_> = stream::iter(jobs)
        .map(|job| {
            let minifier = Arc::clone(&minifier);
            async move {
                let output = job.output.clone();
                let text = job.text.clone();
                let result = pool
                    .exec("minify", &job.source, MINIFY_TIMEOUT, move || Ok(minifier.minify(&output, &text)))
                    .await;
                (job, result)
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    minified.sort_by(|a, b| a.0.output.cmp(&b.0.output));
    minified
}
