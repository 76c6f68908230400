//! Format compilers.
//!
//! The build core only knows the [`SourceCompiler`] and [`Minifier`]
//! contracts. Compilers are pure: they receive a [`CompileInput`] and return a
//! [`CompileOutput`] or an error, and never touch the store or the graph. The
//! orchestrator runs them on the worker pool and applies their results.
//!
//! Built-in implementations cover every source kind so a build runs end to
//! end:
//!
//! | Kind       | Compiler               | Output                     | Node                 |
//! |------------|------------------------|----------------------------|----------------------|
//! | Script     | [`script::ScriptCompiler`]     | `<file>.js`                | `Module/name` or library |
//! | Style      | [`style::StyleCompiler`]       | `<file>.css`               | `css!Module/name`    |
//! | Template   | [`template::TemplateCompiler`] | `<file>.<ext>.js`          | `wml!Module/name`    |
//! | Dictionary | [`dictionary::DictionaryCompiler`] | `<file>.json.js`       | `Module/lang/..json` |
//! | PackageSpec | [`PackageSpecCompiler`]       | `<file>` (validated)       | none                 |
//! | Copy       | [`CopyCompiler`]               | `<file>`                   | none                 |

pub mod dictionary;
pub mod minify;
pub mod script;
pub mod style;
pub mod template;

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use minify::{BuiltinMinifier, MinifyOutput};

use crate::constants::{
    DEFAULT_TASK_TIMEOUT, SCRIPT_COMPILE_TIMEOUT, STYLE_COMPILE_TIMEOUT, TEMPLATE_COMPILE_TIMEOUT,
};
use crate::core::SourceKind;
use crate::graph::ModuleNode;

/// Read-only context shared by every compile task of a run.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    /// Interface module name → source directory.
    pub module_roots: BTreeMap<String, PathBuf>,
}

impl CompileContext {
    /// Absolute location of a `Module/relative/path` source key.
    #[must_use]
    pub fn source_path(&self, key: &str) -> Option<PathBuf> {
        let (module, rest) = key.split_once('/')?;
        self.module_roots.get(module).map(|root| root.join(rest))
    }
}

/// One source file handed to a compiler.
#[derive(Debug, Clone)]
pub struct CompileInput {
    /// Source key, `Module/relative/path`.
    pub path: String,
    /// Source kind.
    pub kind: SourceKind,
    /// Raw file content.
    pub content: Vec<u8>,
    /// Shared run context.
    pub context: Arc<CompileContext>,
}

impl CompileInput {
    /// Content as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Fails if the file is not valid UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.content)
            .map_err(|e| anyhow::anyhow!("{} is not valid UTF-8: {e}", self.path))
    }

    /// Interface module the source belongs to.
    #[must_use]
    pub fn module(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

/// A file a compiler wants written under the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Path relative to the output root.
    pub path: String,
    /// File content.
    pub content: Vec<u8>,
    /// Whether a `.min` sibling should be produced when minimizing.
    pub minify: bool,
}

/// Everything a compiler produced for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    /// Files to write.
    pub outputs: Vec<OutputFile>,
    /// Source keys this file consumed (imports, partials).
    pub dependencies: Vec<String>,
    /// Logical modules defined by this source.
    pub nodes: Vec<(String, ModuleNode)>,
    /// Dependency lists of the defined modules.
    pub links: Vec<(String, Vec<String>)>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

impl CompileOutput {
    /// Logical names defined by this source, packed sub-modules included.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .flat_map(|(name, node)| std::iter::once(name.clone()).chain(node.packed_modules().iter().cloned()))
            .collect()
    }
}

/// Transforms one kind of source file.
pub trait SourceCompiler: Send + Sync {
    /// Task name for dispatch and diagnostics.
    fn task_name(&self) -> &'static str;

    /// Maximum time one compile may take.
    fn timeout(&self) -> Duration {
        DEFAULT_TASK_TIMEOUT
    }

    /// Compile one source.
    ///
    /// # Errors
    ///
    /// Any error marks the source failed for this run.
    fn compile(&self, input: &CompileInput) -> Result<CompileOutput>;
}

/// Produces the `.min` variant of a text output.
pub trait Minifier: Send + Sync {
    /// Minify `text` of the given output path. Never fails: problems are
    /// reported in [`MinifyOutput::errors`] and the caller falls back.
    fn minify(&self, path: &str, text: &str) -> MinifyOutput;
}

/// Copies a source to the output root unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyCompiler;

impl SourceCompiler for CopyCompiler {
    fn task_name(&self) -> &'static str {
        SourceKind::Copy.task_name()
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        Ok(CompileOutput {
            outputs: vec![OutputFile {
                path: input.path.clone(),
                content: input.content.clone(),
                minify: false,
            }],
            ..CompileOutput::default()
        })
    }
}

/// Validates a bundle specification and copies it to the output root,
/// where the packer reads it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageSpecCompiler;

impl SourceCompiler for PackageSpecCompiler {
    fn task_name(&self) -> &'static str {
        SourceKind::PackageSpec.task_name()
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        let specs = crate::packer::parse_spec_document(&input.path, input.text()?)?;
        let warnings = specs
            .iter()
            .filter(|spec| spec.include.is_none())
            .map(|spec| format!("{} has no 'include' option", spec.label()))
            .collect();
        Ok(CompileOutput {
            outputs: vec![OutputFile {
                path: input.path.clone(),
                content: input.content.clone(),
                minify: false,
            }],
            warnings,
            ..CompileOutput::default()
        })
    }
}

/// Compilers by source kind, plus the minifier.
#[derive(Clone)]
pub struct CompilerRegistry {
    compilers: HashMap<SourceKind, Arc<dyn SourceCompiler>>,
    minifier: Arc<dyn Minifier>,
}

impl std::fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.compilers.keys().collect();
        kinds.sort();
        f.debug_struct("CompilerRegistry").field("kinds", &kinds).finish_non_exhaustive()
    }
}

impl CompilerRegistry {
    /// Registry with the built-in compiler for every kind.
    ///
    /// # Errors
    ///
    /// Fails only if a built-in pattern does not compile.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self {
            compilers: HashMap::new(),
            minifier: Arc::new(BuiltinMinifier),
        };
        registry.register(SourceKind::Script, Arc::new(script::ScriptCompiler::new()?));
        registry.register(SourceKind::Style, Arc::new(style::StyleCompiler::new()?));
        registry.register(SourceKind::Template, Arc::new(template::TemplateCompiler::new()?));
        registry.register(SourceKind::Dictionary, Arc::new(dictionary::DictionaryCompiler));
        registry.register(SourceKind::PackageSpec, Arc::new(PackageSpecCompiler));
        registry.register(SourceKind::Copy, Arc::new(CopyCompiler));
        Ok(registry)
    }

    /// Replace the compiler for `kind`.
    pub fn register(&mut self, kind: SourceKind, compiler: Arc<dyn SourceCompiler>) {
        self.compilers.insert(kind, compiler);
    }

    /// Replace the minifier.
    pub fn set_minifier(&mut self, minifier: Arc<dyn Minifier>) {
        self.minifier = minifier;
    }

    /// Compiler for `kind`, if one is registered.
    #[must_use]
    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceCompiler>> {
        self.compilers.get(&kind).cloned()
    }

    /// The minifier.
    #[must_use]
    pub fn minifier(&self) -> Arc<dyn Minifier> {
        Arc::clone(&self.minifier)
    }
}

/// Default per-kind timeouts; stylesheets get the longest.
#[must_use]
pub const fn default_timeout(kind: SourceKind) -> Duration {
    match kind {
        SourceKind::Script => SCRIPT_COMPILE_TIMEOUT,
        SourceKind::Style => STYLE_COMPILE_TIMEOUT,
        SourceKind::Template => TEMPLATE_COMPILE_TIMEOUT,
        SourceKind::Dictionary | SourceKind::PackageSpec | SourceKind::Copy => DEFAULT_TASK_TIMEOUT,
    }
}

/// Quote a logical name for a `define()` call.
pub(crate) fn quote(name: &str) -> String {
    format!("'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn input(path: &str, kind: SourceKind, text: &str) -> CompileInput {
        CompileInput {
            path: path.to_string(),
            kind,
            content: text.as_bytes().to_vec(),
            context: Arc::new(CompileContext::default()),
        }
    }
}
