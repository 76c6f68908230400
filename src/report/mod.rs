//! Structured build report.
//!
//! Every warning and error of a run is logged through `tracing` and also
//! collected here with the file and interface module it concerns. The report
//! is written to `<logs>/builder_report.json` when the run ends, whether it
//! completed or aborted.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::constants::REPORT_FILE;
use crate::core::BuilderError;
use crate::utils::write_json_file;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Informational
    Info,
    /// Something was skipped or degraded
    Warning,
    /// Something failed
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One reported message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity
    pub level: Level,
    /// Human readable message
    pub message: String,
    /// Offending file, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Interface module the file belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Diagnostics collected over one build run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    messages: Vec<Diagnostic>,
}

impl BuildReport {
    /// Empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic without logging it.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    fn add(&mut self, level: Level, message: String, file: Option<&str>, module: Option<&str>) {
        let file_field = file.unwrap_or("-");
        let module_field = module.unwrap_or("-");
        match level {
            Level::Info => info!(file = file_field, module = module_field, "{message}"),
            Level::Warning => warn!(file = file_field, module = module_field, "{message}"),
            Level::Error => error!(file = file_field, module = module_field, "{message}"),
        }
        self.push(Diagnostic {
            level,
            message,
            file: file.map(str::to_string),
            module: module.map(str::to_string),
        });
    }

    /// Log and record an informational message.
    pub fn info(&mut self, message: impl Into<String>, file: Option<&str>, module: Option<&str>) {
        self.add(Level::Info, message.into(), file, module);
    }

    /// Log and record a warning.
    pub fn warning(&mut self, message: impl Into<String>, file: Option<&str>, module: Option<&str>) {
        self.add(Level::Warning, message.into(), file, module);
    }

    /// Log and record an error.
    pub fn error(&mut self, message: impl Into<String>, file: Option<&str>, module: Option<&str>) {
        self.add(Level::Error, message.into(), file, module);
    }

    /// Log and record a [`BuilderError`], taking the file from the error itself.
    pub fn builder_error(&mut self, err: &BuilderError, module: Option<&str>) {
        let file = match err {
            BuilderError::CompileFailed { path, .. }
            | BuilderError::TaskTimeout { path, .. }
            | BuilderError::DuplicateModule { path, .. }
            | BuilderError::PathEscapesOutput { path, .. }
            | BuilderError::DeleteFailed { path, .. } => Some(path.as_str()),
            BuilderError::CacheCorrupted { file, .. } => Some(file.as_str()),
            BuilderError::MissingInclude { spec }
            | BuilderError::EmptyBundle { spec }
            | BuilderError::ModuleWithoutPath { spec, .. }
            | BuilderError::ModuleUnreadable { spec, .. } => Some(spec.as_str()),
            BuilderError::LockHeld { path } | BuilderError::LockRemoved { path } => Some(path.as_str()),
            BuilderError::InvalidWorkerCount { .. } | BuilderError::ConfigError { .. } => None,
        };
        let level = if matches!(err, BuilderError::CacheCorrupted { .. } | BuilderError::InvalidWorkerCount { .. }) {
            Level::Warning
        } else {
            Level::Error
        };
        self.add(level, err.to_string(), file, module);
    }

    /// All diagnostics in the order they were added.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.messages
    }

    /// Number of diagnostics of `level`.
    #[must_use]
    pub fn count(&self, level: Level) -> usize {
        self.messages.iter().filter(|d| d.level == level).count()
    }

    /// Whether any error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.count(Level::Error) > 0
    }

    /// One-line summary for the final log line.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} error(s), {} warning(s)", self.count(Level::Error), self.count(Level::Warning))
    }

    /// Write the report to `<dir>/builder_report.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file written.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(REPORT_FILE);
        write_json_file(&path, self)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counts_and_summary() {
        let mut report = BuildReport::new();
        report.warning("empty file", Some("M/a.less"), Some("M"));
        report.error("boom", None, None);
        report.info("done", None, None);

        assert_eq!(report.count(Level::Warning), 1);
        assert!(report.has_errors());
        assert_eq!(report.summary(), "1 error(s), 1 warning(s)");
    }

    #[test]
    fn test_builder_error_takes_file_from_error() {
        let mut report = BuildReport::new();
        report.builder_error(
            &BuilderError::CompileFailed {
                path: "M/a.less".to_string(),
                message: "bad".to_string(),
            },
            Some("M"),
        );
        report.builder_error(
            &BuilderError::CacheCorrupted {
                file: "input-paths.json".to_string(),
                reason: "eof".to_string(),
            },
            None,
        );

        let diagnostics = report.diagnostics();
        assert_eq!(diagnostics[0].file.as_deref(), Some("M/a.less"));
        assert_eq!(diagnostics[0].module.as_deref(), Some("M"));
        assert_eq!(diagnostics[0].level, Level::Error);
        assert_eq!(diagnostics[1].level, Level::Warning);
    }

    #[test]
    fn test_save_writes_json() {
        let temp = TempDir::new().unwrap();
        let mut report = BuildReport::new();
        report.warning("w", Some("M/x.js"), None);

        let path = report.save(&temp.path().join("logs")).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["messages"][0]["level"], "warning");
        assert_eq!(json["messages"][0]["file"], "M/x.js");
        assert!(json["messages"][0].get("module").is_none());
    }
}
