//! Dependency graph of logical modules.
//!
//! The graph maps logical module names to their [`ModuleNode`] and to the
//! ordered list of names they require. It is persisted as
//! `module-dependencies.json`:
//!
//! ```json
//! {
//!   "nodes": { "Controls/Button": { "kind": "script", "path": "Controls/Button.js", "amd": true } },
//!   "links": { "Controls/Button": ["css!Controls/Button", "wml!Controls/Button"] }
//! }
//! ```
//!
//! # Invariants
//!
//! - Forward links are the only authored edge data. Reverse lookup
//!   ([`DependencyGraph::dependents_of`]) is derived from them on demand and so
//!   can never diverge.
//! - Re-inserting the same node or link is a no-op.
//! - Links may point at names that are not nodes (dangling); this is tolerated
//!   and reported by [`DependencyGraph::dangling_links`].
//!
//! # Traversal
//!
//! [`DependencyGraph::ordered_closure`] is the traversal used by the packer:
//! roots in declaration order, each expanded depth-first with its dependencies
//! emitted before it. A name already visited within the same call is skipped,
//! which makes cycles harmless and lets the first occurrence win.

pub mod node;

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub use node::{AssetNode, LibraryNode, ModuleNode, ScriptNode};

use crate::core::{interface_module_of, split_plugin};

/// Loader plugins whose targets are expected to be nodes of the graph.
const NODE_PLUGINS: &[&str] = &["css", "wml", "tmpl", "html"];

/// Directed graph of logical modules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    #[serde(default)]
    nodes: BTreeMap<String, ModuleNode>,
    #[serde(default)]
    links: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub fn set_node(&mut self, name: impl Into<String>, node: ModuleNode) {
        self.nodes.insert(name.into(), node);
    }

    /// Replace the dependency list of `name`.
    ///
    /// Duplicates are dropped, keeping the first occurrence, since order
    /// matters for modules with side effects.
    pub fn set_link<I, S>(&mut self, name: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let deps: Vec<String> =
            dependencies.into_iter().map(Into::into).filter(|d| seen.insert(d.clone())).collect();
        self.links.insert(name.into(), deps);
    }

    /// Look up a node.
    #[must_use]
    pub fn get_node(&self, name: &str) -> Option<&ModuleNode> {
        self.nodes.get(name)
    }

    /// Whether `name` is a node.
    #[must_use]
    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies of `name` in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.links.get(name).map_or(&[], Vec::as_slice)
    }

    /// Modules that list `name` as a direct dependency, sorted by name.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// Remove a node, its own links, and every link pointing at it.
    ///
    /// Returns the removed node, if it existed.
    pub fn remove_node(&mut self, name: &str) -> Option<ModuleNode> {
        let removed = self.nodes.remove(name);
        self.links.remove(name);
        for deps in self.links.values_mut() {
            deps.retain(|d| d != name);
        }
        removed
    }

    /// Remove a node and its own links, keeping links that point at it.
    ///
    /// Used when the defining source is rebuilt: dependents that were not
    /// rebuilt still need their edges once the node is set again.
    pub fn clear_node(&mut self, name: &str) -> Option<ModuleNode> {
        self.links.remove(name);
        self.nodes.remove(name)
    }

    /// All node names in sorted order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// All nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &ModuleNode)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Nodes of one interface module and the links leaving them.
    #[must_use]
    pub fn module_subgraph(&self, module: &str) -> Self {
        let owned = |name: &String| interface_module_of(name) == module;
        Self {
            nodes: self.nodes.iter().filter(|(name, _)| owned(name)).map(|(n, v)| (n.clone(), v.clone())).collect(),
            links: self.links.iter().filter(|(name, _)| owned(name)).map(|(n, v)| (n.clone(), v.clone())).collect(),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes and no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }

    /// Library node whose body contains `name`, if any.
    #[must_use]
    pub fn library_containing(&self, name: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, node)| node.packed_modules().iter().any(|p| p == name))
            .map(|(library, _)| library.as_str())
    }

    /// Whether a name refers to something outside the graph by design,
    /// e.g. `i18n!Controls` or `optional!Foo`.
    #[must_use]
    pub fn is_external_reference(name: &str) -> bool {
        matches!(split_plugin(name), (Some(plugin), _) if !NODE_PLUGINS.contains(&plugin))
    }

    /// Links whose target is neither a node, a library sub-module, nor an
    /// external plugin reference, as `(from, to)` pairs.
    #[must_use]
    pub fn dangling_links(&self) -> Vec<(&str, &str)> {
        let packed: HashSet<&str> = self
            .nodes
            .values()
            .flat_map(|n| n.packed_modules().iter().map(String::as_str))
            .collect();

        self.links
            .iter()
            .flat_map(|(from, deps)| deps.iter().map(move |to| (from.as_str(), to.as_str())))
            .filter(|(_, to)| {
                !self.nodes.contains_key(*to)
                    && !packed.contains(to)
                    && !Self::is_external_reference(to)
            })
            .collect()
    }

    /// Depth-first closure of `roots`, dependencies before dependents.
    ///
    /// Roots are expanded in the given order; for each name its direct
    /// dependencies are expanded in declaration order before the name itself is
    /// emitted. Only names accepted by `follow` are expanded or emitted. The
    /// visited set lives for this call only: a name already entered is skipped,
    /// so cycles terminate and the first occurrence decides placement. A
    /// dependency on a library sub-module that is not a node itself is
    /// followed to the library packing it.
    pub fn ordered_closure<F>(&self, roots: &[String], follow: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            self.visit(root, &follow, &mut visited, &mut order);
        }
        order
    }

    fn visit<F>(&self, name: &str, follow: &F, visited: &mut HashSet<String>, order: &mut Vec<String>)
    where
        F: Fn(&str) -> bool,
    {
        // A library sub-module is provided by its library
        let name = if self.nodes.contains_key(name) {
            name
        } else {
            self.library_containing(name).unwrap_or(name)
        };
        if !follow(name) || !visited.insert(name.to_string()) {
            return;
        }
        for dep in self.dependencies_of(name) {
            self.visit(dep, follow, visited, order);
        }
        order.push(name.to_string());
    }

    /// Everything `name` requires, transitively, followed by `name` itself.
    ///
    /// Dangling and external references are left out.
    #[must_use]
    pub fn required_by(&self, name: &str) -> Vec<String> {
        self.ordered_closure(&[name.to_string()], |n| self.has_node(n))
    }

    /// Strongly connected components with more than one member, or a self-link.
    ///
    /// Cycles are legal; this is reported for diagnostics only. Members are
    /// sorted within each cycle and cycles are sorted by their first member.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices = HashMap::new();
        for name in self.nodes.keys().chain(self.links.keys()) {
            indices.entry(name.as_str()).or_insert_with(|| graph.add_node(name.as_str()));
        }
        for (from, deps) in &self.links {
            for to in deps {
                if let (Some(&a), Some(&b)) = (indices.get(from.as_str()), indices.get(to.as_str())) {
                    graph.update_edge(a, b, ());
                }
            }
        }

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let members: BTreeSet<String> = scc.iter().map(|&i| graph[i].to_string()).collect();
                members.into_iter().collect()
            })
            .collect();
        cycles.sort();
        cycles
    }
}
