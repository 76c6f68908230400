//! Markup templates.
//!
//! A template is wrapped into a `define()` that returns its markup as a
//! string. References to other templates and scripts in the markup become
//! links of the template node.

use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;

use super::{CompileInput, CompileOutput, OutputFile, SourceCompiler, default_timeout, quote};
use crate::core::{SourceKind, strip_extension};
use crate::graph::ModuleNode;

/// Built-in template compiler.
#[derive(Debug, Clone)]
pub struct TemplateCompiler {
    reference: Regex,
}

/// Loader plugin for a template extension.
fn plugin_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("tmpl") => "tmpl",
        Some("xhtml") => "html",
        _ => "wml",
    }
}

impl TemplateCompiler {
    /// Create the compiler.
    ///
    /// # Errors
    ///
    /// Fails only if the reference pattern does not compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            reference: Regex::new(r"\b(wml|tmpl|html|optional|js)!([A-Za-z0-9_\-.]+(?:/[A-Za-z0-9_\-.]+)*)")?,
        })
    }

    fn links(&self, markup: &str, own_name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.reference
            .captures_iter(markup)
            .filter_map(|caps| {
                let plugin = caps.get(1)?.as_str();
                let target = caps.get(2)?.as_str().trim_end_matches('.');
                Some(if plugin == "js" {
                    target.to_string()
                } else {
                    format!("{plugin}!{target}")
                })
            })
            .filter(|name| name != own_name && seen.insert(name.clone()))
            .collect()
    }
}

impl SourceCompiler for TemplateCompiler {
    fn task_name(&self) -> &'static str {
        SourceKind::Template.task_name()
    }

    fn timeout(&self) -> Duration {
        default_timeout(SourceKind::Template)
    }

    fn compile(&self, input: &CompileInput) -> Result<CompileOutput> {
        let markup = input.text()?;
        let name = format!("{}!{}", plugin_for(&input.path), strip_extension(&input.path));
        let links = self.links(markup, &name);
        let output_path = format!("{}.js", input.path);

        let deps = links.iter().map(|l| quote(l)).collect::<Vec<_>>().join(",");
        let body = serde_json::to_string(markup)?;
        let wrapped = format!(
            "define({},[{deps}],function(){{return {body};}});",
            quote(&name)
        );

        Ok(CompileOutput {
            outputs: vec![OutputFile {
                path: output_path.clone(),
                content: wrapped.into_bytes(),
                minify: true,
            }],
            nodes: vec![(name.clone(), ModuleNode::template(output_path))],
            links: vec![(name, links)],
            ..CompileOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::test_support::input;

    #[test]
    fn test_wml_is_wrapped_with_links() {
        let markup = r#"<div><ws:partial template="wml!Controls/Item/Item"/><ws:partial template="Controls/Icon"/>
<Controls.List/><span>{{ 'js!Env/Env' }}</span><ws:partial template="optional!Controls/Extra"/></div>"#;
        let out = TemplateCompiler::new()
            .unwrap()
            .compile(&input("Controls/List/List.wml", SourceKind::Template, markup))
            .unwrap();

        assert_eq!(out.nodes[0].0, "wml!Controls/List/List");
        assert_eq!(out.outputs[0].path, "Controls/List/List.wml.js");
        assert_eq!(
            out.links[0].1,
            vec!["wml!Controls/Item/Item", "Env/Env", "optional!Controls/Extra"]
        );

        let text = String::from_utf8(out.outputs[0].content.clone()).unwrap();
        assert!(text.starts_with(
            "define('wml!Controls/List/List',['wml!Controls/Item/Item','Env/Env','optional!Controls/Extra'],function(){return \"<div>"
        ));
        assert!(text.ends_with(";});"));
    }

    #[test]
    fn test_plugin_by_extension() {
        assert_eq!(plugin_for("M/a.tmpl"), "tmpl");
        assert_eq!(plugin_for("M/a.xhtml"), "html");
        assert_eq!(plugin_for("M/a.wml"), "wml");
    }

    #[test]
    fn test_self_reference_is_not_a_link() {
        let out = TemplateCompiler::new()
            .unwrap()
            .compile(&input("M/tree.tmpl", SourceKind::Template, "<x template=\"tmpl!M/tree\"/>"))
            .unwrap();
        assert!(out.links[0].1.is_empty());
    }
}
