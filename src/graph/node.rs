//! Module node variants.
//!
//! Each logical module in the graph is one of a small set of kinds. All of them
//! expose the same accessors ([`ModuleNode::path`], [`ModuleNode::is_amd`],
//! [`ModuleNode::packed_modules`]) so packing code never probes for optional
//! keys.

use serde::{Deserialize, Serialize};

/// A plain AMD script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptNode {
    /// Physical path relative to the output root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether the body is wrapped in a `define()` call.
    #[serde(default)]
    pub amd: bool,
}

/// A script that physically contains other modules packed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryNode {
    /// Physical path relative to the output root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether the body is wrapped in `define()` calls.
    #[serde(default)]
    pub amd: bool,
    /// Logical names defined inside the library body.
    #[serde(default)]
    pub packed: Vec<String>,
}

/// A non-script artifact: stylesheet, template or dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetNode {
    /// Physical path relative to the output root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One logical module in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModuleNode {
    /// `Module/name`
    Script(ScriptNode),
    /// `Module/library` containing private sub-modules
    Library(LibraryNode),
    /// `css!Module/name`
    Stylesheet(AssetNode),
    /// `wml!Module/name`, `tmpl!Module/name`, `html!Module/name`
    Template(AssetNode),
    /// `Module/lang/en/en.json`
    Dictionary(AssetNode),
}

impl ModuleNode {
    /// Script node with a physical path.
    #[must_use]
    pub fn script(path: impl Into<String>) -> Self {
        Self::Script(ScriptNode {
            path: Some(path.into()),
            amd: true,
        })
    }

    /// Library node with a physical path and its packed sub-modules.
    #[must_use]
    pub fn library(path: impl Into<String>, packed: Vec<String>) -> Self {
        Self::Library(LibraryNode {
            path: Some(path.into()),
            amd: true,
            packed,
        })
    }

    /// Stylesheet node with a physical path.
    #[must_use]
    pub fn stylesheet(path: impl Into<String>) -> Self {
        Self::Stylesheet(AssetNode {
            path: Some(path.into()),
        })
    }

    /// Template node with a physical path.
    #[must_use]
    pub fn template(path: impl Into<String>) -> Self {
        Self::Template(AssetNode {
            path: Some(path.into()),
        })
    }

    /// Dictionary node with a physical path.
    #[must_use]
    pub fn dictionary(path: impl Into<String>) -> Self {
        Self::Dictionary(AssetNode {
            path: Some(path.into()),
        })
    }

    /// Physical path relative to the output root, if known.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Script(node) => node.path.as_deref(),
            Self::Library(node) => node.path.as_deref(),
            Self::Stylesheet(node) | Self::Template(node) | Self::Dictionary(node) => {
                node.path.as_deref()
            }
        }
    }

    /// Whether the body registers itself through `define()`.
    ///
    /// Templates and dictionaries are always compiled into `define()` wrappers;
    /// stylesheets never are.
    #[must_use]
    pub const fn is_amd(&self) -> bool {
        match self {
            Self::Script(node) => node.amd,
            Self::Library(node) => node.amd,
            Self::Template(_) | Self::Dictionary(_) => true,
            Self::Stylesheet(_) => false,
        }
    }

    /// Sub-modules physically contained in this node's body.
    #[must_use]
    pub fn packed_modules(&self) -> &[String] {
        match self {
            Self::Library(node) => &node.packed,
            _ => &[],
        }
    }

    /// Whether this is a stylesheet.
    #[must_use]
    pub const fn is_stylesheet(&self) -> bool {
        matches!(self, Self::Stylesheet(_))
    }

    /// Whether this node contains other modules.
    #[must_use]
    pub const fn is_library(&self) -> bool {
        matches!(self, Self::Library(_))
    }
}
