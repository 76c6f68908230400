//! AMD scripts.
//!
//! Scripts are copied verbatim; only their `define()` calls are read to add
//! nodes and links to the graph. A file with several named defines is a
//! library: the define named after the file (or the first one) owns the
//! node, the others become its packed sub-modules.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Duration;

use super::{CompileInput, CompileOutput, OutputFile, SourceCompiler, default_timeout};
use crate::core::{SourceKind, strip_extension};
use crate::graph::ModuleNode;

/// One `define()` call found in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Define {
    name: Option<String>,
    dependencies: Vec<String>,
}

/// Built-in script compiler.
#[derive(Debug, Clone)]
pub struct ScriptCompiler {
    define: Regex,
}

impl ScriptCompiler {
    /// Create the compiler.
    ///
    /// # Errors
    ///
    /// Fails only if the define pattern does not compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            define: Regex::new(
                r#"\bdefine\s*\(\s*(?:['"]([^'"]+)['"]\s*,?\s*)?(?:\[([^\]]*)\])?"#,
            )?,
        })
    }

    fn defines(&self, text: &str) -> Vec<Define> {
        self.define
            .captures_iter(text)
            .map(|caps| Define {
                name: caps.get(1).map(|m| m.as_str().to_string()),
                dependencies: caps.get(2).map(|m| parse_string_list(m.as_str())).unwrap_or_default(),
            })
            .collect()
    }
}

/// Parse `'a', "b"` into its string items.
fn parse_string_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

impl SourceCompiler for ScriptCompiler {
    fn task_name(&self) -> &'static str {
        SourceKind::Script.task_name()
    }

    fn timeout(&self) -> Duration {
        default_timeout(SourceKind::Script)
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        let text = input.text()?;
        let path_name = strip_extension(&input.path).to_string();
        let defines = self.defines(text);

        let mut output = CompileOutput {
            outputs: vec![OutputFile {
                path: input.path.clone(),
                content: input.content.clone(),
                minify: true,
            }],
            ..CompileOutput::default()
        };

        if defines.is_empty() {
            output.nodes.push((
                path_name,
                ModuleNode::Script(crate::graph::ScriptNode {
                    path: Some(input.path.clone()),
                    amd: false,
                }),
            ));
            return Ok(output);
        }

        let named: Vec<&Define> = defines.iter().filter(|d| d.name.is_some()).collect();
        if named.len() <= 1 {
            let define = named.first().copied().unwrap_or(&defines[0]);
            let name = define.name.clone().unwrap_or(path_name);
            output.links.push((name.clone(), define.dependencies.clone()));
            output.nodes.push((name, ModuleNode::script(input.path.clone())));
            return Ok(output);
        }

        let owner = named
            .iter()
            .find(|d| d.name.as_deref() == Some(path_name.as_str()))
            .copied()
            .unwrap_or(named[0]);
        let library_name = owner.name.clone().unwrap_or(path_name);

        let packed: Vec<String> = named
            .iter()
            .filter_map(|d| d.name.clone())
            .filter(|n| *n != library_name)
            .collect();
        let internal: BTreeSet<&str> =
            packed.iter().map(String::as_str).chain(std::iter::once(library_name.as_str())).collect();

        let mut seen = BTreeSet::new();
        let external_deps: Vec<String> = defines
            .iter()
            .flat_map(|d| d.dependencies.iter())
            .filter(|dep| !internal.contains(dep.as_str()) && seen.insert(dep.as_str()))
            .cloned()
            .collect();

        output.links.push((library_name.clone(), external_deps));
        output.nodes.push((library_name, ModuleNode::library(input.path.clone(), packed)));
        Ok(output)
    }
}
