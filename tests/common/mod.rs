//! Shared helpers for the wsbuild integration tests.

// Not every helper is used by every test module
#![allow(dead_code)]

use anyhow::Result;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use wsbuild::compiler::{CompileInput, CompileOutput, CompilerRegistry, SourceCompiler};
use wsbuild::config::BuildConfig;
use wsbuild::core::SourceKind;
use wsbuild::orchestrator::{BuildOutcome, Builder};

/// Wraps a compiler and records every source it is asked to compile.
pub struct RecordingCompiler {
    inner: Arc<dyn SourceCompiler>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl SourceCompiler for RecordingCompiler {
    fn task_name(&self) -> &'static str {
        self.inner.task_name()
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(input.path.clone());
        }
        self.inner.compile(input)
    }
}

/// Observes compiler invocations across runs.
#[derive(Clone, Default)]
pub struct CompileLog {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl CompileLog {
    /// Built-in registry with every compiler wrapped.
    pub fn registry(&self) -> Result<CompilerRegistry> {
        let mut registry = CompilerRegistry::with_builtins()?;
        for kind in [
            SourceKind::Script,
            SourceKind::Style,
            SourceKind::Template,
            SourceKind::Dictionary,
            SourceKind::PackageSpec,
            SourceKind::Copy,
        ] {
            if let Some(inner) = registry.get(kind) {
                registry.register(
                    kind,
                    Arc::new(RecordingCompiler {
                        inner,
                        calls: Arc::clone(&self.calls),
                        seen: Arc::clone(&self.seen),
                    }),
                );
            }
        }
        Ok(registry)
    }

    /// Compiles since the last call, sorted.
    pub fn take(&self) -> Vec<String> {
        self.calls.store(0, Ordering::SeqCst);
        let mut seen = std::mem::take(&mut *self.seen.lock().unwrap());
        seen.sort();
        seen
    }

    /// Total compiles since the last [`take`](Self::take).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Run one build with the recording registry.
pub async fn build(config: BuildConfig, log: &CompileLog) -> Result<BuildOutcome> {
    Builder::new(config)?.with_registry(log.registry()?).run().await
}
