//! Bounded worker pool for per-file tasks.
//!
//! Compile and minify tasks are blocking, CPU-heavy functions. The pool runs
//! each one on tokio's blocking thread pool while a semaphore caps how many
//! run at once. Every task carries its own timeout; a task that exceeds it is
//! reported as failed and its siblings are unaffected.
//!
//! Sizing follows the CPU count: one core is left to the coordinating task,
//! at least one worker always exists, and an override larger than the CPU
//! count is clamped with a warning.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::constants::{FALLBACK_CORE_COUNT, TASKS_PER_WORKER};
use crate::core::BuilderError;

/// Effective pool configuration, also written to `workerpool-config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Tasks allowed to run at the same time.
    pub workers: usize,
    /// CPUs detected on this machine.
    pub available_cpus: usize,
    /// Override from configuration or command line, before clamping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<usize>,
}

impl PoolConfig {
    /// Size the pool for this machine.
    ///
    /// Returns the configuration and, when the override had to be clamped,
    /// the [`BuilderError::InvalidWorkerCount`] to report as a warning.
    #[must_use]
    pub fn resolve(requested: Option<usize>) -> (Self, Option<BuilderError>) {
        let available_cpus = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(FALLBACK_CORE_COUNT);
        Self::resolve_for(requested, available_cpus)
    }

    fn resolve_for(requested: Option<usize>, available_cpus: usize) -> (Self, Option<BuilderError>) {
        let default_workers = available_cpus.saturating_sub(1).max(1);
        let (workers, clamped) = match requested {
            Some(0) => (default_workers, Some(0)),
            Some(n) if n > available_cpus => (available_cpus, Some(n)),
            Some(n) => (n, None),
            None => (default_workers, None),
        };

        let warning = clamped.map(|requested| BuilderError::InvalidWorkerCount {
            requested,
            available: available_cpus,
        });
        (
            Self {
                workers,
                available_cpus,
                requested,
            },
            warning,
        )
    }

    /// How many tasks a stream should keep in flight for this pool.
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.workers * TASKS_PER_WORKER
    }
}

/// Semaphore-bounded executor of blocking tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Pool with `config.workers` slots.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        debug!(workers = config.workers, cpus = config.available_cpus, "Worker pool created");
        Self {
            semaphore: Arc::new(Semaphore::new(config.workers)),
            config,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run `task` on a worker, failing it after `timeout`.
    ///
    /// `name` and `path` only label diagnostics. The timeout starts once a
    /// worker slot is free. A timed-out task keeps its slot until the
    /// blocking function actually returns, so the bound always holds.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::TaskTimeout`] when the timeout elapses and
    /// [`BuilderError::CompileFailed`] when the task errors or panics.
    pub async fn exec<T, F>(&self, name: &str, path: &str, timeout: Duration, task: F) -> Result<T, BuilderError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let failed = |message: String| BuilderError::CompileFailed {
            path: path.to_string(),
            message,
        };

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| failed(format!("worker pool closed: {e}")))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(failed(format!("{e:#}"))),
            Ok(Err(join_error)) => Err(failed(format!("task '{name}' panicked: {join_error}"))),
            Err(_) => {
                warn!(task = name, file = path, "Task timed out after {}s", timeout.as_secs());
                Err(BuilderError::TaskTimeout {
                    task: name.to_string(),
                    path: path.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}
