//! Localization dictionaries (`Module/lang/<locale>/<locale>.json`).

use anyhow::{Context, Result};

use super::{CompileInput, CompileOutput, OutputFile, SourceCompiler, quote};
use crate::core::SourceKind;
use crate::graph::ModuleNode;

/// Validates a dictionary and wraps it into a `define()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DictionaryCompiler;

impl SourceCompiler for DictionaryCompiler {
    fn task_name(&self) -> &'static str {
        SourceKind::Dictionary.task_name()
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        let value: serde_json::Value = serde_json::from_str(input.text()?)
            .with_context(|| format!("invalid dictionary {}", input.path))?;
        if !value.is_object() {
            anyhow::bail!("dictionary {} must be a JSON object", input.path);
        }

        let output_path = format!("{}.js", input.path);
        let wrapped = format!(
            "define({},[],function(){{return {};}});",
            quote(&input.path),
            serde_json::to_string(&value)?
        );

        Ok(CompileOutput {
            outputs: vec![OutputFile {
                path: output_path.clone(),
                content: wrapped.into_bytes(),
                minify: false,
            }],
            nodes: vec![(input.path.clone(), ModuleNode::dictionary(output_path))],
            links: vec![(input.path.clone(), Vec::new())],
            ..CompileOutput::default()
        })
    }
}
