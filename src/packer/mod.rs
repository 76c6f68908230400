//! Custom packer.
//!
//! Turns `*.package.json` bundle specifications plus the dependency graph
//! into bundle artifacts and routing metadata. The packer is synchronous and
//! pure over already loaded data; it returns the files to write and lets the
//! caller write them.
//!
//! # Pipeline
//!
//! 1. [`spec::parse_spec_document`] reads each specification file
//! 2. [`resolve::sort_specs`] puts specifications in claim order (priority
//!    first, then the configured [`BundleOrder`])
//! 3. [`resolve::resolve_bundle`] expands include and exclude rules
//! 4. [`resolve::apply_claims`] gives every contended module to the first
//!    bundle and records an [`Intersect`] for the others
//! 5. [`emit::generate_custom_package`] concatenates bodies and builds routes
//!
//! # Outputs
//!
//! | File | Location | Content |
//! |------|----------|---------|
//! | `<bundle>.js` / `<bundle>.css` | output root | packed bodies |
//! | `bundles.json` | `<output>/.builder/` | bundle → contained modules |
//! | `bundlesRoute.json` | `<output>/.builder/` and `<output>/<Owner>/.builder/` | module → bundle |
//! | `customPackIntersects.json` | `<output>/<Module>/.builder/` | contended module → winner, losers |
//! | `libraries.json` | `<output>/<Module>/.builder/` | library → packed sub-modules |

pub mod emit;
pub mod resolve;
pub mod spec;

use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub use emit::{CssRebaser, ModuleSource, OutputDirSource, PackedBundle};
pub use resolve::{Intersect, ResolvedBundle, generate_package_json_configs};
pub use spec::{BundleSpec, ModuleRule, parse_spec_document};

use crate::config::{BuildConfig, BundleOrder};
use crate::constants::{
    BUNDLES_FILE, BUNDLES_ROUTE_FILE, INTERSECTS_FILE, LIBRARIES_FILE, META_FOLDER, MODULE_DEPENDENCIES_FILE,
};
use crate::core::{BuilderError, interface_module_of};
use crate::graph::DependencyGraph;
use crate::utils::json_bytes;

/// A file produced by the packer: path relative to the output root and bytes.
pub type GeneratedFile = (String, Vec<u8>);

/// Accumulated results of every bundle of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackResults {
    /// Bundle path → contained module names, routed or not.
    pub bundles: BTreeMap<String, Vec<String>>,
    /// Module name → bundle path.
    pub bundles_route: BTreeMap<String, String>,
    /// Contended module → winning and losing bundles.
    pub intersects: BTreeMap<String, Intersect>,
    /// Soft problems: unresolvable names, bundles emptied by claims.
    pub warnings: Vec<String>,
    /// Generated bundles, in claim order.
    pub packages: Vec<PackedBundle>,
}

impl PackResults {
    fn append(&mut self, packed: PackedBundle) {
        self.bundles.insert(packed.output.clone(), packed.modules.clone());
        self.bundles_route.extend(packed.routes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.packages.push(packed);
    }

    /// Bundle artifacts plus the root and per-owner routing documents.
    ///
    /// Empty artifacts are left out.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn render(&self) -> Result<Vec<GeneratedFile>> {
        let mut files = Vec::new();
        let mut owner_routes: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();

        for packed in &self.packages {
            if !packed.js.is_empty() {
                files.push((format!("{}.js", packed.output), packed.js.clone().into_bytes()));
            }
            if !packed.css.is_empty() {
                files.push((format!("{}.css", packed.output), packed.css.clone().into_bytes()));
            }
            owner_routes
                .entry(packed.owner.as_str())
                .or_default()
                .extend(packed.routes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        if self.packages.is_empty() {
            return Ok(files);
        }
        files.push((format!("{META_FOLDER}/{BUNDLES_FILE}"), json_bytes(&self.bundles)?));
        files.push((format!("{META_FOLDER}/{BUNDLES_ROUTE_FILE}"), json_bytes(&self.bundles_route)?));
        for (owner, routes) in owner_routes {
            files.push((format!("{owner}/{META_FOLDER}/{BUNDLES_ROUTE_FILE}"), json_bytes(&routes)?));
        }
        Ok(files)
    }
}

/// Packer configured for one run.
#[derive(Debug, Clone)]
pub struct CustomPacker {
    css: CssRebaser,
    order: BundleOrder,
}

impl CustomPacker {
    /// Packer using the url prefix and tie-break policy of `config`.
    ///
    /// # Errors
    ///
    /// Fails only if a built-in pattern does not compile.
    pub fn new(config: &BuildConfig) -> Result<Self> {
        Ok(Self {
            css: CssRebaser::new(&config.url_service_path)?,
            order: config.bundle_order,
        })
    }

    /// Artifacts of one resolved bundle, without claim handling.
    ///
    /// # Errors
    ///
    /// See [`emit::generate_custom_package`].
    pub fn generate_custom_package(
        &self,
        graph: &DependencyGraph,
        bundle: &ResolvedBundle,
        source: &dyn ModuleSource,
    ) -> Result<PackedBundle, BuilderError> {
        emit::generate_custom_package(graph, bundle, source, &self.css)
    }

    /// Resolve, claim and emit every specification into `results`.
    ///
    /// # Errors
    ///
    /// The first specification error aborts: a missing `include`, a bundle
    /// that resolves to nothing, or a module body that cannot be read.
    pub fn generate_all_custom_packages(
        &self,
        mut specs: Vec<BundleSpec>,
        graph: &DependencyGraph,
        source: &dyn ModuleSource,
        results: &mut PackResults,
    ) -> Result<(), BuilderError> {
        resolve::sort_specs(&mut specs, self.order);

        let mut resolved = generate_package_json_configs(graph, &specs)?;
        for bundle in &mut resolved {
            results.warnings.append(&mut bundle.warnings);
        }

        let (bundles, mut warnings) = resolve::apply_claims(graph, resolved, &mut results.intersects);
        results.warnings.append(&mut warnings);

        for bundle in &bundles {
            let packed = self.generate_custom_package(graph, bundle, source)?;
            debug!(bundle = %packed.output, modules = packed.modules.len(), "Bundle generated");
            results.append(packed);
        }
        info!(bundles = results.packages.len(), intersects = results.intersects.len(), "Custom packing done");
        Ok(())
    }
}

/// Intersect records grouped by the interface module of the contended name.
#[must_use]
pub fn group_intersects(results: &PackResults) -> BTreeMap<String, BTreeMap<String, Intersect>> {
    let mut grouped: BTreeMap<String, BTreeMap<String, Intersect>> = BTreeMap::new();
    for (name, intersect) in &results.intersects {
        grouped
            .entry(interface_module_of(name).to_string())
            .or_default()
            .insert(name.clone(), intersect.clone());
    }
    grouped
}

/// One `customPackIntersects.json` per interface module with contended names.
///
/// # Errors
///
/// Fails only if serialization fails.
pub fn collect_all_intersects(results: &PackResults) -> Result<Vec<GeneratedFile>> {
    group_intersects(results)
        .into_iter()
        .map(|(module, intersects)| Ok((format!("{module}/{META_FOLDER}/{INTERSECTS_FILE}"), json_bytes(&intersects)?)))
        .collect()
}

/// Library nodes grouped by interface module: library → packed sub-modules.
#[must_use]
pub fn libraries(graph: &DependencyGraph) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let mut grouped: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for (name, node) in graph.nodes() {
        if node.packed_modules().is_empty() {
            continue;
        }
        grouped
            .entry(interface_module_of(name).to_string())
            .or_default()
            .insert(name.to_string(), node.packed_modules().to_vec());
    }
    grouped
}

/// One `libraries.json` per interface module that has libraries.
///
/// # Errors
///
/// Fails only if serialization fails.
pub fn render_libraries(graph: &DependencyGraph) -> Result<Vec<GeneratedFile>> {
    libraries(graph)
        .into_iter()
        .map(|(module, libs)| Ok((format!("{module}/{META_FOLDER}/{LIBRARIES_FILE}"), json_bytes(&libs)?)))
        .collect()
}

/// One `module-dependencies.json` per interface module, holding its part of
/// the dependency graph.
///
/// # Errors
///
/// Fails only if serialization fails.
pub fn render_module_dependencies<'a>(
    graph: &DependencyGraph,
    modules: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<GeneratedFile>> {
    modules
        .into_iter()
        .map(|module| {
            let content = json_bytes(&graph.module_subgraph(module))?;
            Ok((format!("{module}/{MODULE_DEPENDENCIES_FILE}"), content))
        })
        .collect()
}
