//! Emission of bundle artifacts.
//!
//! Bodies are read from the output root (they are compiled outputs, not
//! sources) through [`ModuleSource`], so the packer itself does no I/O
//! beyond that one call.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use super::resolve::ResolvedBundle;
use crate::compiler::quote;
use crate::core::BuilderError;
use crate::graph::DependencyGraph;

/// Where module bodies are read from.
pub trait ModuleSource: Send + Sync {
    /// Text of the file at `path`, relative to the output root.
    ///
    /// # Errors
    ///
    /// Any I/O error reading the file.
    fn read(&self, path: &str) -> std::io::Result<String>;
}

/// Reads bodies from the output directory.
#[derive(Debug, Clone)]
pub struct OutputDirSource {
    root: PathBuf,
}

impl OutputDirSource {
    /// Source rooted at the output directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModuleSource for OutputDirSource {
    fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.root.join(path))
    }
}

impl ModuleSource for BTreeMap<String, String> {
    fn read(&self, path: &str) -> std::io::Result<String> {
        self.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{path} not found"))
        })
    }
}

/// The text and routing of one generated bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedBundle {
    /// Bundle path relative to the output root, without extension.
    pub output: String,
    /// Interface module owning the bundle file.
    pub owner: String,
    /// Script artifact; empty when nothing but styles was packed.
    pub js: String,
    /// Stylesheet artifact.
    pub css: String,
    /// Every module name contained, in emission order.
    pub modules: Vec<String>,
    /// Module name → bundle path, for routed modules only.
    pub routes: BTreeMap<String, String>,
}

/// Stylesheet rewriting for packed bodies.
#[derive(Debug, Clone)]
pub struct CssRebaser {
    url: Regex,
    import_target: Regex,
    import_statement: Regex,
    url_service_path: String,
}

impl CssRebaser {
    /// Rebaser producing urls under `url_service_path`.
    ///
    /// # Errors
    ///
    /// Fails only if a built-in pattern does not compile.
    pub fn new(url_service_path: &str) -> Result<Self, regex::Error> {
        let mut prefix = url_service_path.to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Ok(Self {
            url: Regex::new(r#"url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#)?,
            import_target: Regex::new(r#"@import\s+(['"])([^'"]+)(['"])"#)?,
            import_statement: Regex::new(r"(?m)^[ \t]*@import[^;\n]*;[ \t]*\r?\n?")?,
            url_service_path: prefix,
        })
    }

    fn is_rebasable(url: &str) -> bool {
        !(url.starts_with('/')
            || url.starts_with('#')
            || url.starts_with("data:")
            || url.contains("://")
            || url.split_once(':').is_some_and(|(scheme, _)| !scheme.contains('/')))
    }

    fn absolute(&self, dir: &str, url: &str) -> String {
        let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
        for segment in url.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        format!("{}{}", self.url_service_path, segments.join("/"))
    }

    /// Rewrite relative `url()` and `@import` targets of a stylesheet that
    /// lived in `dir` to absolute urls.
    #[must_use]
    pub fn rebase(&self, text: &str, dir: &str) -> String {
        let with_urls = self.url.replace_all(text, |caps: &Captures<'_>| {
            let target = caps[2].trim();
            if Self::is_rebasable(target) {
                format!("url({}{}{})", &caps[1], self.absolute(dir, target), &caps[3])
            } else {
                caps[0].to_string()
            }
        });
        self.import_target
            .replace_all(&with_urls, |caps: &Captures<'_>| {
                let target = &caps[2];
                if Self::is_rebasable(target) {
                    format!("@import {}{}{}", &caps[1], self.absolute(dir, target), &caps[3])
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Concatenate stylesheet bodies with every `@import` statement moved to
    /// the top, in the order encountered.
    #[must_use]
    pub fn concat(&self, bodies: &[String]) -> String {
        let mut imports = Vec::new();
        let mut rest = Vec::new();
        for body in bodies {
            for statement in self.import_statement.find_iter(body) {
                imports.push(statement.as_str().trim().to_string());
            }
            let stripped = self.import_statement.replace_all(body, "");
            let stripped = stripped.trim();
            if !stripped.is_empty() {
                rest.push(stripped.to_string());
            }
        }
        imports.extend(rest);
        imports.join("\n")
    }
}

fn directory_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Build the artifacts of one resolved bundle.
///
/// Members are emitted in [`DependencyGraph::ordered_closure`] order restricted
/// to the bundle, so dependencies packed together come first and a cycle
/// still yields one block per module.
///
/// # Errors
///
/// Returns [`BuilderError::ModuleWithoutPath`] or
/// [`BuilderError::ModuleUnreadable`] naming the specification.
pub fn generate_custom_package(
    graph: &DependencyGraph,
    bundle: &ResolvedBundle,
    source: &dyn ModuleSource,
    css: &CssRebaser,
) -> Result<PackedBundle, BuilderError> {
    let output = bundle.spec.output.clone();
    let spec = bundle.spec.label();
    let member_set: BTreeSet<&str> = bundle.members.iter().map(String::as_str).collect();
    let order = graph.ordered_closure(&bundle.members, |name| member_set.contains(name));

    let css_route = format!("css!{}", output.strip_suffix(".min").unwrap_or(&output));
    let mut js_parts = Vec::new();
    let mut css_parts = Vec::new();
    let mut packed = PackedBundle {
        output: output.clone(),
        owner: bundle.spec.owner_module().to_string(),
        ..PackedBundle::default()
    };

    for name in order {
        let node = graph.get_node(&name);
        let path = node.and_then(|n| n.path()).ok_or_else(|| BuilderError::ModuleWithoutPath {
            module: name.clone(),
            spec: spec.clone(),
        })?;
        let body = source.read(path).map_err(|e| BuilderError::ModuleUnreadable {
            module: name.clone(),
            path: path.to_string(),
            spec: spec.clone(),
            reason: e.to_string(),
        })?;

        if node.is_some_and(|n| n.is_stylesheet()) {
            css_parts.push(css.rebase(&body, directory_of(path)));
            js_parts.push(format!("define({},[{}],'');", quote(&name), quote(&css_route)));
        } else {
            js_parts.push(body.trim_end().to_string());
        }

        if !bundle.carve_outs.contains(&name) {
            packed.routes.insert(name.clone(), output.clone());
        }
        if let Some(node) = node {
            for sub in node.packed_modules() {
                packed.routes.insert(sub.clone(), output.clone());
                packed.modules.push(sub.clone());
            }
        }
        packed.modules.push(name);
    }

    packed.js = js_parts.join("\n");
    packed.css = css.concat(&css_parts);
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleNode;
    use crate::packer::resolve::resolve_bundle;
    use crate::packer::spec::parse_spec_document;

    fn rebaser() -> CssRebaser {
        CssRebaser::new("/").unwrap()
    }

    fn resolved(graph: &DependencyGraph, json: &str) -> ResolvedBundle {
        let spec = parse_spec_document("M/x.package.json", json).unwrap().remove(0);
        resolve_bundle(graph, &spec).unwrap()
    }

    #[test]
    fn test_rebase_relative_urls_only() {
        let css = rebaser().rebase(
            ".a{background:url(../img/a.png)}.b{background:url('/abs.png')}.c{background:url(data:image/png;base64,xx)}",
            "M/styles",
        );
        assert_eq!(
            css,
            ".a{background:url(/M/img/a.png)}.b{background:url('/abs.png')}.c{background:url(data:image/png;base64,xx)}"
        );
    }

    #[test]
    fn test_rebase_uses_service_path() {
        let rebaser = CssRebaser::new("/service").unwrap();
        assert_eq!(rebaser.rebase("@import 'base.css';", "M"), "@import '/service/M/base.css';");
    }

    #[test]
    fn test_imports_hoisted() {
        let css = rebaser().concat(&[
            ".a{}\n".to_string(),
            "@import '/x.css';\n.b{}\n".to_string(),
            "@import '/y.css';\n".to_string(),
        ]);
        assert_eq!(css, "@import '/x.css';\n@import '/y.css';\n.a{}\n.b{}");
    }

    #[test]
    fn test_cycle_emits_each_module_once() {
        let mut graph = DependencyGraph::new();
        for name in ["M/a", "M/b", "M/c"] {
            graph.set_node(name, ModuleNode::script(format!("{name}.js")));
        }
        graph.set_link("M/a", ["M/b"]);
        graph.set_link("M/b", ["M/c"]);
        graph.set_link("M/c", ["M/a"]);
        let bodies: BTreeMap<String, String> = ["M/a", "M/b", "M/c"]
            .iter()
            .map(|n| (format!("{n}.js"), format!("define('{n}',[],function(){{}});\n")))
            .collect();

        let bundle = resolved(&graph, r#"{ "include": ["M/a", "M/b", "M/c"] }"#);
        let packed = generate_custom_package(&graph, &bundle, &bodies, &rebaser()).unwrap();

        for name in ["M/a", "M/b", "M/c"] {
            assert_eq!(packed.js.matches(&format!("define('{name}'")).count(), 1);
        }
        assert_eq!(packed.modules, vec!["M/c", "M/b", "M/a"]);
    }

    #[test]
    fn test_styles_get_stub_and_carve_out_is_not_routed() {
        let mut graph = DependencyGraph::new();
        graph.set_node("M/a", ModuleNode::script("M/a.js"));
        graph.set_node("css!M/a", ModuleNode::stylesheet("M/a.css"));
        graph.set_link("M/a", ["css!M/a"]);
        let bodies = BTreeMap::from([
            ("M/a.js".to_string(), "define('M/a',['css!M/a'],function(){});".to_string()),
            ("M/a.css".to_string(), ".a{background:url(a.png)}".to_string()),
        ]);

        let bundle = resolved(&graph, r#"{ "include": ["M/*"], "exclude": ["css!*"] }"#);
        let packed = generate_custom_package(&graph, &bundle, &bodies, &rebaser()).unwrap();

        assert!(packed.js.contains("define('css!M/a',['css!M/x.package'],'');"));
        assert!(packed.js.contains("define('M/a'"));
        assert_eq!(packed.css, ".a{background:url(/M/a.png)}");
        assert!(packed.modules.contains(&"css!M/a".to_string()));
        assert!(!packed.routes.contains_key("css!M/a"));
        assert_eq!(packed.routes["M/a"], "M/x.package.min");
    }

    #[test]
    fn test_library_routes_sub_modules() {
        let mut graph = DependencyGraph::new();
        graph.set_node("M/lib", ModuleNode::library("M/lib.js", vec!["M/_lib/x".to_string()]));
        let bodies = BTreeMap::from([("M/lib.js".to_string(), "define('M/_lib/x');define('M/lib');".to_string())]);

        let bundle = resolved(&graph, r#"{ "include": ["M/lib"] }"#);
        let packed = generate_custom_package(&graph, &bundle, &bodies, &rebaser()).unwrap();
        assert_eq!(packed.routes.len(), 2);
        assert_eq!(packed.js.matches("define('M/lib')").count(), 1);
    }

    #[test]
    fn test_library_packed_before_users_of_its_sub_modules() {
        let mut graph = DependencyGraph::new();
        graph.set_node("M/user", ModuleNode::script("M/user.js"));
        graph.set_node("M/lib", ModuleNode::library("M/lib.js", vec!["M/_lib/x".to_string()]));
        graph.set_link("M/user", ["M/_lib/x"]);
        let bodies = BTreeMap::from([
            ("M/user.js".to_string(), "define('M/user',['M/_lib/x'],function(){});".to_string()),
            ("M/lib.js".to_string(), "define('M/_lib/x');define('M/lib');".to_string()),
        ]);

        let bundle = resolved(&graph, r#"{ "include": ["M/user", "M/lib"] }"#);
        let packed = generate_custom_package(&graph, &bundle, &bodies, &rebaser()).unwrap();
        assert_eq!(packed.modules, vec!["M/_lib/x", "M/lib", "M/user"]);
        let lib = packed.js.find("define('M/lib')").unwrap();
        let user = packed.js.find("define('M/user'").unwrap();
        assert!(lib < user, "got: {}", packed.js);
    }

    #[test]
    fn test_missing_body_names_the_spec() {
        let mut graph = DependencyGraph::new();
        graph.set_node("M/a", ModuleNode::script("M/a.js"));
        let bundle = resolved(&graph, r#"{ "include": ["M/a"] }"#);
        let err = generate_custom_package(&graph, &bundle, &BTreeMap::<String, String>::new(), &rebaser()).unwrap_err();
        assert!(matches!(err, BuilderError::ModuleUnreadable { ref spec, .. } if spec == "M/x.package.json"));
    }
}
