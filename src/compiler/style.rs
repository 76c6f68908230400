//! Stylesheets.
//!
//! `.less` imports are inlined recursively and reported as source
//! dependencies, so editing an imported file rebuilds every importer. Imports
//! of plain `.css` files and absolute urls are left in place; the packer
//! hoists them when stylesheets are concatenated.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Duration;

use super::{CompileInput, CompileOutput, OutputFile, SourceCompiler, default_timeout};
use crate::core::{SourceKind, strip_extension};
use crate::graph::ModuleNode;

const MAX_IMPORT_DEPTH: usize = 64;

/// Built-in stylesheet compiler.
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    import: Regex,
}

impl StyleCompiler {
    /// Create the compiler.
    ///
    /// # Errors
    ///
    /// Fails only if the import pattern does not compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            import: Regex::new(
                r#"@import\s+(?:\([a-z,\s]*\)\s*)?(?:url\(\s*)?['"]([^'"]+)['"]\s*\)?[^;]*;"#,
            )?,
        })
    }

    fn inline(
        &self,
        input: &CompileInput,
        key: &str,
        text: &str,
        visited: &mut BTreeSet<String>,
        depth: usize,
    ) -> Result<String> {
        if depth > MAX_IMPORT_DEPTH {
            bail!("imports nested deeper than {MAX_IMPORT_DEPTH} levels at {key}");
        }

        let mut result = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.import.captures_iter(text) {
            let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            result.push_str(&text[last..whole.start()]);
            last = whole.end();

            if is_plain_css_import(target.as_str()) {
                result.push_str(whole.as_str());
                continue;
            }

            let import_key = resolve_import(key, target.as_str())
                .with_context(|| format!("import '{}' in {key} leaves the source tree", target.as_str()))?;
            if !visited.insert(import_key.clone()) {
                continue;
            }

            let path = input
                .context
                .source_path(&import_key)
                .with_context(|| format!("import '{}' in {key} names an unknown module", target.as_str()))?;
            let imported = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot find import '{}' from {key}", target.as_str()))?;
            result.push_str(&self.inline(input, &import_key, &imported, visited, depth + 1)?);
        }
        result.push_str(&text[last..]);
        Ok(result)
    }
}

/// Imports that stay as `@import` statements in the compiled stylesheet.
fn is_plain_css_import(target: &str) -> bool {
    target.ends_with(".css")
        || target.starts_with('/')
        || target.starts_with("//")
        || target.contains("://")
}

/// Resolve an import target relative to the importing source key.
///
/// Returns `None` when `..` climbs above the source tree.
fn resolve_import(importer: &str, target: &str) -> Option<String> {
    let mut segments: Vec<&str> = importer.split('/').collect();
    segments.pop();
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    let mut key = segments.join("/");
    if !key.ends_with(".less") {
        key.push_str(".less");
    }
    Some(key)
}

impl SourceCompiler for StyleCompiler {
    fn task_name(&self) -> &'static str {
        SourceKind::Style.task_name()
    }

    fn timeout(&self) -> Duration {
        default_timeout(SourceKind::Style)
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        let text = input.text()?;
        let base = strip_extension(&input.path);
        let output_path = format!("{base}.css");

        let mut output = CompileOutput::default();
        let css = if text.trim().is_empty() {
            output.warnings.push("empty file".to_string());
            String::new()
        } else {
            let mut visited = BTreeSet::from([input.path.clone()]);
            let css = self.inline(input, &input.path, text, &mut visited, 0)?;
            visited.remove(&input.path);
            output.dependencies = visited.into_iter().collect();
            css
        };

        output.nodes.push((format!("css!{base}"), ModuleNode::stylesheet(output_path.clone())));
        output.outputs.push(OutputFile {
            path: output_path,
            content: css.into_bytes(),
            minify: true,
        });
        Ok(output)
    }
}
