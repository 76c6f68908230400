//! Error handling for wsbuild
//!
//! This module provides the error taxonomy of the builder and user-friendly error
//! reporting for the CLI. The error system is designed around two principles:
//! 1. **Strongly-typed errors** so the orchestrator can decide what is file-scoped
//!    (recorded, build continues) and what is run-scoped (build aborts)
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Per-file**: [`BuilderError::CompileFailed`], [`BuilderError::TaskTimeout`],
//!   [`BuilderError::DuplicateModule`]: the file is marked failed in the change store
//!   and retried on the next run
//! - **Cache**: [`BuilderError::CacheCorrupted`]: recovered by treating the document
//!   as absent, only ever logged
//! - **Packer**: [`BuilderError::MissingInclude`], [`BuilderError::EmptyBundle`],
//!   [`BuilderError::ModuleWithoutPath`], [`BuilderError::ModuleUnreadable`]: abort
//!   the run and name the offending specification file
//! - **Contention**: [`BuilderError::LockHeld`], [`BuilderError::LockRemoved`]
//! - **Reconciliation**: [`BuilderError::PathEscapesOutput`], [`BuilderError::DeleteFailed`]:
//!   logged, the stale file may remain
//! - **Configuration**: [`BuilderError::ConfigError`], [`BuilderError::InvalidWorkerCount`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsbuild::core::{BuilderError, user_friendly_error};
//!
//! let error = BuilderError::LockHeld {
//!     path: "/tmp/cache/builder.lockfile".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for builder operations.
///
/// Every variant carries owned strings rather than source errors so the type
/// stays `Clone` and can be stored in the structured build report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// A format compiler rejected a source file.
    #[error("Failed to compile {path}: {message}")]
    CompileFailed {
        /// Source path relative to the workspace (`Module/dir/file.ext`)
        path: String,
        /// Message reported by the compiler
        message: String,
    },

    /// Two sources define the same logical module.
    #[error("{path} defines '{module}', which is already defined by {owner}")]
    DuplicateModule {
        /// Source path that was rejected
        path: String,
        /// Logical module name defined twice
        module: String,
        /// Source that keeps the name
        owner: String,
    },

    /// A delegated task exceeded its timeout.
    #[error("Task '{task}' for {path} timed out after {timeout_secs}s")]
    TaskTimeout {
        /// Task name (e.g. "compileStyle")
        task: String,
        /// Source path the task was working on
        path: String,
        /// Timeout that was exceeded
        timeout_secs: u64,
    },

    /// A persisted cache document could not be read.
    #[error("Cache file {file} is corrupted: {reason}")]
    CacheCorrupted {
        /// Cache document path
        file: String,
        /// Parse or read error
        reason: String,
    },

    /// A bundle specification has no `include` declaration.
    #[error("Bundle specification {spec} must contain an 'include' option")]
    MissingInclude {
        /// Specification file
        spec: String,
    },

    /// A bundle specification resolved to zero modules.
    #[error("Nothing was packed for bundle specification {spec}; check its include rules")]
    EmptyBundle {
        /// Specification file
        spec: String,
    },

    /// A module selected for packing has no physical path in the dependency graph.
    #[error("Module '{module}' packed by {spec} has no physical path")]
    ModuleWithoutPath {
        /// Logical module name
        module: String,
        /// Specification file that selected the module
        spec: String,
    },

    /// A module body selected for packing could not be read.
    #[error("Cannot read module '{module}' ({path}) packed by {spec}: {reason}")]
    ModuleUnreadable {
        /// Logical module name
        module: String,
        /// Physical path relative to the output root
        path: String,
        /// Specification file that selected the module
        spec: String,
        /// Underlying I/O error
        reason: String,
    },

    /// Another builder process owns the cache directory.
    #[error("Another builder process is using the cache: {path} exists")]
    LockHeld {
        /// Lock file path
        path: String,
    },

    /// The lock file disappeared while this process held it.
    #[error("Lock file {path} was removed during the build")]
    LockRemoved {
        /// Lock file path
        path: String,
    },

    /// A stale output resolved outside of the output root.
    #[error("Refusing to delete {path}: outside of output root {root}")]
    PathEscapesOutput {
        /// Offending path
        path: String,
        /// Configured output root
        root: String,
    },

    /// A stale output could not be deleted.
    #[error("Failed to delete stale output {path}: {reason}")]
    DeleteFailed {
        /// Path that could not be removed
        path: String,
        /// Underlying I/O error
        reason: String,
    },

    /// The configured worker count is unusable.
    #[error("Invalid worker count {requested}: this machine has {available} CPUs")]
    InvalidWorkerCount {
        /// Requested worker count
        requested: usize,
        /// CPUs available on this machine
        available: usize,
    },

    /// The build configuration is invalid.
    #[error("Invalid build configuration: {message}")]
    ConfigError {
        /// What is wrong
        message: String,
    },
}

impl BuilderError {
    /// Returns `true` for errors scoped to a single source file.
    ///
    /// File-scoped errors never abort a build; everything else does.
    #[must_use]
    pub const fn is_file_scoped(&self) -> bool {
        matches!(
            self,
            Self::CompileFailed { .. } | Self::TaskTimeout { .. } | Self::DuplicateModule { .. }
        )
    }
}

/// Error wrapper carrying a suggestion and details for CLI display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error message
    pub error: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from any displayable error.
    #[must_use]
    pub fn new(error: impl fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors.
    ///
    /// - Error message: red and bold
    /// - Details: yellow
    /// - Suggestion: green
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Known [`BuilderError`] variants anywhere in the error chain get a tailored
/// suggestion; everything else is shown with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(builder_error) = error.chain().find_map(|e| e.downcast_ref::<BuilderError>()) {
        return create_error_context(builder_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(&error)
            .with_suggestion("Check ownership and permissions of the cache and output directories");
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }
    ErrorContext::new(message)
}

fn create_error_context(error: &BuilderError) -> ErrorContext {
    let ctx = ErrorContext::new(error);
    match error {
        BuilderError::LockHeld { path } => ctx
            .with_suggestion(format!(
                "Wait for the other build to finish. If no build is running, remove {path} and restart"
            ))
            .with_details("Two builders sharing one cache directory would corrupt each other's results"),
        BuilderError::LockRemoved { .. } => ctx
            .with_suggestion("Restart the build; its results are not guaranteed to be consistent")
            .with_details("Something deleted the lock file while the build was running"),
        BuilderError::MissingInclude { .. } => ctx
            .with_suggestion("Add an \"include\" array listing module names or masks to the specification"),
        BuilderError::EmptyBundle { .. } => ctx
            .with_suggestion("Check that the include masks match module names in module-dependencies.json")
            .with_details("Exclude rules and bundles with higher priority may have removed every module"),
        BuilderError::ModuleWithoutPath { .. } | BuilderError::ModuleUnreadable { .. } => ctx
            .with_suggestion("Rebuild the interface module that defines this module, or exclude it from the bundle"),
        BuilderError::InvalidWorkerCount { available, .. } => ctx.with_suggestion(format!(
            "Use a worker count between 1 and {available}, or omit it to use the default"
        )),
        BuilderError::DuplicateModule { owner, .. } => ctx
            .with_suggestion(format!("Rename or remove one of the sources; {owner} keeps the name")),
        BuilderError::ConfigError { .. } => {
            ctx.with_suggestion("Check the build configuration file syntax and paths")
        }
        _ => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_scoped_errors() {
        let compile = BuilderError::CompileFailed {
            path: "Module/a.less".to_string(),
            message: "unexpected token".to_string(),
        };
        assert!(compile.is_file_scoped());

        let duplicate = BuilderError::DuplicateModule {
            path: "M/a.less".to_string(),
            module: "css!M/a".to_string(),
            owner: "M/a.css".to_string(),
        };
        assert!(duplicate.is_file_scoped());

        let lock = BuilderError::LockHeld {
            path: "cache/builder.lockfile".to_string(),
        };
        assert!(!lock.is_file_scoped());
    }

    #[test]
    fn test_user_friendly_lock_error_has_suggestion() {
        let error = anyhow::Error::from(BuilderError::LockHeld {
            path: "cache/builder.lockfile".to_string(),
        });
        let ctx = user_friendly_error(error);
        assert!(ctx.error.contains("builder.lockfile"));
        assert!(ctx.suggestion.unwrap().contains("remove cache/builder.lockfile"));
    }

    #[test]
    fn test_user_friendly_error_finds_wrapped_builder_error() {
        let error = anyhow::Error::from(BuilderError::EmptyBundle {
            spec: "Module/app.package.json".to_string(),
        })
        .context("Custom packing failed");
        let ctx = user_friendly_error(error);
        assert!(ctx.error.contains("Module/app.package.json"));
        assert!(ctx.suggestion.is_some());
    }

    #[test]
    fn test_plain_error_shows_cause_chain() {
        let error = anyhow::anyhow!("root cause").context("outer");
        let ctx = user_friendly_error(error);
        assert!(ctx.error.contains("outer"));
        assert!(ctx.error.contains("root cause"));
        assert_eq!(format!("{ctx}"), ctx.error);
    }
}
