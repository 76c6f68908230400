//! Resolution of bundle specifications against the dependency graph.

use glob::Pattern;
use std::collections::{BTreeMap, BTreeSet};

use super::spec::{BundleSpec, ModuleRule};
use crate::config::BundleOrder;
use crate::core::{BuilderError, bare_name, interface_module_of, split_plugin};
use crate::graph::DependencyGraph;

/// Minimum similarity for suggesting a known name.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// A specification resolved to concrete graph nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBundle {
    /// Specification this bundle came from.
    pub spec: BundleSpec,
    /// Node names to pack, in declaration order.
    pub members: Vec<String>,
    /// Stylesheets kept despite an exclude because their script is packed.
    /// Packed but never routed.
    pub carve_outs: BTreeSet<String>,
    /// Soft problems found while resolving.
    pub warnings: Vec<String>,
}

fn matches_rule(pattern: &Pattern, rule_text: &str, name: &str) -> bool {
    if rule_text.contains('!') {
        pattern.matches(name)
    } else {
        pattern.matches(bare_name(name))
    }
}

fn suggestion(graph: &DependencyGraph, name: &str) -> Option<String> {
    graph
        .node_names()
        .map(|candidate| (strsim::jaro_winkler(name, candidate), candidate))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.to_string())
}

/// Expand rules into node names, in rule order, without duplicates.
///
/// Exact names that only exist as library sub-modules resolve to their
/// library. Names that resolve to nothing produce a warning. The returned
/// set holds the names matched by exact-name rules.
fn expand_rules(
    graph: &DependencyGraph,
    rules: &[ModuleRule],
    warnings: &mut Vec<String>,
    label: &str,
) -> Result<Vec<String>, BuilderError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |name: String, out: &mut Vec<String>| {
        if seen.insert(name.clone()) {
            out.push(name);
        }
    };

    for rule in rules {
        match rule {
            ModuleRule::Name(text) if rule.is_mask() => {
                let pattern = Pattern::new(text).map_err(|e| BuilderError::ConfigError {
                    message: format!("invalid mask '{text}' in {label}: {e}"),
                })?;
                let matched: Vec<String> = graph
                    .node_names()
                    .filter(|name| matches_rule(&pattern, text, name))
                    .map(str::to_string)
                    .collect();
                if matched.is_empty() {
                    warnings.push(format!("mask '{text}' in {label} matches no module"));
                }
                for name in matched {
                    push(name, &mut out);
                }
            }
            ModuleRule::Name(name) => {
                if graph.has_node(name) {
                    push(name.clone(), &mut out);
                } else if let Some(library) = graph.library_containing(name) {
                    push(library.to_string(), &mut out);
                } else {
                    let mut message = format!("module '{name}' in {label} is not in the dependency graph");
                    if let Some(similar) = suggestion(graph, name) {
                        message.push_str(&format!("; did you mean '{similar}'?"));
                    }
                    warnings.push(message);
                }
            }
            ModuleRule::RequiredBy { required_by } => {
                if graph.has_node(required_by) {
                    for name in graph.required_by(required_by) {
                        push(name, &mut out);
                    }
                } else {
                    warnings.push(format!(
                        "requiredBy root '{required_by}' in {label} is not in the dependency graph"
                    ));
                }
            }
        }
    }
    Ok(out)
}

/// Resolve one specification.
///
/// # Errors
///
/// Returns [`BuilderError::MissingInclude`] when the entry has no `include`,
/// [`BuilderError::EmptyBundle`] when nothing is left after excludes, and
/// [`BuilderError::ConfigError`] for an invalid mask.
pub fn resolve_bundle(graph: &DependencyGraph, spec: &BundleSpec) -> Result<ResolvedBundle, BuilderError> {
    let label = spec.label();
    let include = spec.include.as_ref().ok_or_else(|| BuilderError::MissingInclude {
        spec: label.clone(),
    })?;

    let mut warnings = Vec::new();
    let mut included = expand_rules(graph, include, &mut warnings, &label)?;
    for module in &spec.modules {
        let before = included.len();
        for name in graph.node_names() {
            if interface_module_of(name) == module && !included.iter().any(|n| n == name) {
                included.push(name.to_string());
            }
        }
        if included.len() == before {
            warnings.push(format!("interface module '{module}' in {label} has no modules"));
        }
    }

    let excluded: BTreeSet<String> =
        expand_rules(graph, &spec.exclude, &mut Vec::new(), &label)?.into_iter().collect();

    let scripts_kept: BTreeSet<&str> = included
        .iter()
        .filter(|name| !excluded.contains(*name) && split_plugin(name).0.is_none())
        .map(String::as_str)
        .collect();

    let mut carve_outs = BTreeSet::new();
    let mut members = Vec::new();
    for name in &included {
        if !excluded.contains(name) {
            members.push(name.clone());
            continue;
        }
        if let (Some("css"), bare) = split_plugin(name)
            && scripts_kept.contains(bare)
        {
            carve_outs.insert(name.clone());
            members.push(name.clone());
        }
    }

    if members.is_empty() {
        return Err(BuilderError::EmptyBundle { spec: label });
    }

    Ok(ResolvedBundle {
        spec: spec.clone(),
        members,
        carve_outs,
        warnings,
    })
}

/// Resolve every specification, in the order given.
///
/// # Errors
///
/// Fails on the first specification that cannot be resolved.
pub fn generate_package_json_configs(
    graph: &DependencyGraph,
    specs: &[BundleSpec],
) -> Result<Vec<ResolvedBundle>, BuilderError> {
    specs.iter().map(|spec| resolve_bundle(graph, spec)).collect()
}

/// Sort specifications into claim order: priority first, then `order`.
pub fn sort_specs(specs: &mut [BundleSpec], order: BundleOrder) {
    match order {
        BundleOrder::Declaration => specs.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| a.source.cmp(&b.source)).then(a.index.cmp(&b.index))
        }),
        BundleOrder::Lexicographic => specs.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| a.output.cmp(&b.output)).then(a.index.cmp(&b.index))
        }),
    }
}

/// A module claimed by more than one bundle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Intersect {
    /// Bundle that packs the module.
    pub winner: String,
    /// Bundles that wanted it too, in claim order.
    pub losers: Vec<String>,
}

/// Drop members already claimed by an earlier bundle.
///
/// `bundles` must be in claim order. A library loses as a whole when any
/// name it contains was claimed first. Each contended name gets an
/// [`Intersect`]. Bundles left empty are removed with a warning.
pub fn apply_claims(
    graph: &DependencyGraph,
    bundles: Vec<ResolvedBundle>,
    intersects: &mut BTreeMap<String, Intersect>,
) -> (Vec<ResolvedBundle>, Vec<String>) {
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();
    let mut kept = Vec::new();
    let mut warnings = Vec::new();

    for mut bundle in bundles {
        let output = bundle.spec.output.clone();
        let mut members = Vec::new();
        for member in std::mem::take(&mut bundle.members) {
            let mut names = vec![member.clone()];
            if let Some(node) = graph.get_node(&member) {
                names.extend(node.packed_modules().iter().cloned());
            }

            let contended: Vec<&String> = names
                .iter()
                .filter(|n| claimed.get(*n).is_some_and(|owner| *owner != output))
                .collect();
            if contended.is_empty() {
                for name in names {
                    claimed.insert(name, output.clone());
                }
                members.push(member);
            } else {
                for name in contended {
                    let winner = claimed.get(name).cloned().unwrap_or_default();
                    intersects
                        .entry(name.clone())
                        .or_insert_with(|| Intersect {
                            winner,
                            losers: Vec::new(),
                        })
                        .losers
                        .push(output.clone());
                }
                bundle.carve_outs.remove(&member);
            }
        }

        if members.is_empty() {
            warnings.push(format!(
                "every module of {} is packed by a bundle with higher precedence; nothing written",
                bundle.spec.label()
            ));
            continue;
        }
        bundle.members = members;
        kept.push(bundle);
    }
    (kept, warnings)
}
