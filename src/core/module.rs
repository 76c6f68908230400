//! Logical module names and source kinds.
//!
//! A logical module name is `[plugin!]Interface/path/name`, e.g.
//! `Controls/Button`, `css!Controls/Button`, `wml!Controls/Button/Button`.
//! The first segment of the bare name is the interface module that owns it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kind of a source file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// `.js` AMD scripts
    Script,
    /// `.css` / `.less` stylesheets
    Style,
    /// `.tmpl` / `.wml` / `.xhtml` markup templates
    Template,
    /// `lang/<locale>/<locale>.json` localization dictionaries
    Dictionary,
    /// `*.package.json` bundle specifications, consumed by the packer
    PackageSpec,
    /// Anything else, copied as-is
    Copy,
}

impl SourceKind {
    /// Classify a module-relative source path.
    #[must_use]
    pub fn from_path(relative_path: &str) -> Self {
        if relative_path.ends_with(crate::constants::PACKAGE_SPEC_SUFFIX) {
            return Self::PackageSpec;
        }
        let extension = Path::new(relative_path).extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension {
            "js" => Self::Script,
            "css" | "less" => Self::Style,
            "tmpl" | "wml" | "xhtml" => Self::Template,
            "json" if is_dictionary_path(relative_path) => Self::Dictionary,
            _ => Self::Copy,
        }
    }

    /// Task name used for worker-pool dispatch and diagnostics.
    #[must_use]
    pub const fn task_name(self) -> &'static str {
        match self {
            Self::Script => "compileScript",
            Self::Style => "compileStyle",
            Self::Template => "compileTemplate",
            Self::Dictionary => "compileDictionary",
            Self::PackageSpec => "readPackageSpec",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Script => "script",
            Self::Style => "style",
            Self::Template => "template",
            Self::Dictionary => "dictionary",
            Self::PackageSpec => "package spec",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// `Module/lang/en/en.json` style paths.
fn is_dictionary_path(relative_path: &str) -> bool {
    let parts: Vec<&str> = relative_path.split('/').collect();
    match parts.as_slice() {
        [.., "lang", locale, file] => file.strip_suffix(".json") == Some(*locale),
        _ => false,
    }
}

/// Split a logical name into its loader plugin prefix and bare name.
///
/// Only the outermost plugin is split off: `optional!css!A/b` gives
/// `(Some("optional"), "css!A/b")`.
#[must_use]
pub fn split_plugin(name: &str) -> (Option<&str>, &str) {
    match name.split_once('!') {
        Some((plugin, rest)) if !plugin.is_empty() && !plugin.contains('/') => (Some(plugin), rest),
        _ => (None, name),
    }
}

/// Name with every loader plugin prefix removed.
#[must_use]
pub fn bare_name(name: &str) -> &str {
    let mut current = name;
    while let (Some(_), rest) = split_plugin(current) {
        current = rest;
    }
    current
}

/// Interface module that owns a logical name or a `/`-separated path.
#[must_use]
pub fn interface_module_of(name: &str) -> &str {
    let bare = bare_name(name);
    bare.split('/').next().unwrap_or(bare)
}

/// Convert a filesystem path to the `/`-separated form used in every cache document.
#[must_use]
pub fn unixify(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip the last extension of a `/`-separated path.
#[must_use]
pub fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}
