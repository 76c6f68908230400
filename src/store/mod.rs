//! Change-detection store.
//!
//! Holds what the previous build recorded for every source file and collects
//! what the current build records. Classification compares a snapshot of
//! source modification times against the previous records.
//!
//! # Keys
//!
//! Sources are keyed `Module/relative/path` and outputs by their path relative
//! to the output root, so records survive a wholesale rename of the
//! workspace directory.
//!
//! # Invalidation
//!
//! A file is directly changed when its modification time differs, when it
//! failed last time, or when its recorded outputs are gone. Invalidation then
//! propagates over the reverse dependency map until nothing new is reached,
//! so a change three imports deep is picked up in the same run.

pub mod record;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use record::{ChangeReason, FileStatus, MinifiedEntry, SourceRecord, StoreData};

/// Modification times of the sources found on disk, keyed like records.
pub type SourceSnapshot = BTreeMap<String, i64>;

/// Previous and current build records.
#[derive(Debug, Default)]
pub struct ChangeStore {
    previous: StoreData,
    current: StoreData,
    first_build: bool,
}

impl ChangeStore {
    /// Store over the records of the previous build.
    ///
    /// With `first_build` set every file classifies as new, but the previous
    /// output set is kept so stale outputs are still reconciled away.
    #[must_use]
    pub fn new(previous: StoreData, first_build: bool) -> Self {
        Self {
            previous,
            current: StoreData::default(),
            first_build,
        }
    }

    /// Whether no usable previous build exists.
    #[must_use]
    pub const fn is_first_build(&self) -> bool {
        self.first_build
    }

    /// Records loaded from the previous build.
    #[must_use]
    pub const fn previous(&self) -> &StoreData {
        &self.previous
    }

    /// Records collected so far in this build.
    #[must_use]
    pub const fn current(&self) -> &StoreData {
        &self.current
    }

    /// Consume the store, returning this build's records for persisting.
    #[must_use]
    pub fn into_current(self) -> StoreData {
        self.current
    }

    fn previous_record(&self, path: &str) -> Option<&SourceRecord> {
        if self.first_build {
            None
        } else {
            self.previous.input_paths.get(path)
        }
    }

    /// Direct classification of one source, without dependency propagation.
    #[must_use]
    pub fn classify(&self, path: &str, mtime: i64) -> FileStatus {
        let Some(record) = self.previous_record(path) else {
            return FileStatus::New;
        };
        if self.previous.files_with_errors.contains(path) {
            FileStatus::Changed(ChangeReason::PreviouslyFailed)
        } else if record.mtime != mtime {
            FileStatus::Changed(ChangeReason::Modified)
        } else {
            FileStatus::Unchanged
        }
    }

    /// Classify every source in `sources`.
    ///
    /// Unchanged files whose recorded outputs fail `output_exists` become
    /// [`ChangeReason::OutputMissing`]. Every file that consumes a changed,
    /// new or removed source, directly or transitively, becomes
    /// [`ChangeReason::DependencyChanged`].
    pub fn classify_all<F>(&self, sources: &SourceSnapshot, output_exists: F) -> BTreeMap<String, FileStatus>
    where
        F: Fn(&str) -> bool,
    {
        let mut statuses: BTreeMap<String, FileStatus> = sources
            .iter()
            .map(|(path, &mtime)| {
                let mut status = self.classify(path, mtime);
                if status == FileStatus::Unchanged
                    && let Some(record) = self.previous_record(path)
                    && !record.output.iter().all(|o| output_exists(o))
                {
                    status = FileStatus::Changed(ChangeReason::OutputMissing);
                }
                (path.clone(), status)
            })
            .collect();

        if self.first_build {
            return statuses;
        }

        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (path, record) in &self.previous.input_paths {
            for dep in &record.dependencies {
                dependents.entry(dep.as_str()).or_default().push(path.as_str());
            }
        }

        // Seed with everything that differs from the previous build, including
        // consumed files that are no longer sources at all.
        let mut queue: VecDeque<String> = statuses
            .iter()
            .filter(|(_, status)| status.needs_processing())
            .map(|(path, _)| path.clone())
            .collect();
        queue.extend(
            dependents
                .keys()
                .filter(|dep| !sources.contains_key(**dep))
                .map(|dep| (*dep).to_string()),
        );

        while let Some(changed) = queue.pop_front() {
            for &dependent in dependents.get(changed.as_str()).into_iter().flatten() {
                if let Some(status) = statuses.get_mut(dependent)
                    && *status == FileStatus::Unchanged
                {
                    *status = FileStatus::Changed(ChangeReason::DependencyChanged(changed.clone()));
                    queue.push_back(dependent.to_string());
                }
            }
        }

        statuses
    }

    /// Sources recorded by the previous build that are not in `sources`.
    #[must_use]
    pub fn removed_sources(&self, sources: &SourceSnapshot) -> Vec<String> {
        self.previous
            .input_paths
            .keys()
            .filter(|path| !sources.contains_key(path.as_str()))
            .cloned()
            .collect()
    }

    /// Start a fresh record for a source about to be processed.
    pub fn begin(&mut self, path: &str, mtime: i64) {
        self.current.input_paths.insert(
            path.to_string(),
            SourceRecord {
                mtime,
                ..SourceRecord::default()
            },
        );
        self.current.files_with_errors.remove(path);
    }

    /// Record that `path` produced `output`.
    pub fn record_output(&mut self, path: &str, output: impl Into<String>) {
        let output = output.into();
        let record = self.current.input_paths.entry(path.to_string()).or_default();
        if !record.output.contains(&output) {
            record.output.push(output);
        }
    }

    /// Replace the source files `path` consumes.
    pub fn record_dependencies<I, S>(&mut self, path: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deps: Vec<String> = dependencies.into_iter().map(Into::into).collect();
        deps.sort();
        deps.dedup();
        self.current.input_paths.entry(path.to_string()).or_default().dependencies = deps;
    }

    /// Replace the logical module names `path` defines.
    pub fn record_modules<I, S>(&mut self, path: &str, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.current.input_paths.entry(path.to_string()).or_default().modules =
            modules.into_iter().map(Into::into).collect();
    }

    /// Mark `path` failed.
    ///
    /// The file keeps the outputs, dependencies and module names of its last
    /// successful build, so nothing it produced earlier is reconciled away, and
    /// it will be processed again next run.
    pub fn mark_failed(&mut self, path: &str, mtime: i64) {
        let mut record = self.previous.input_paths.get(path).cloned().unwrap_or_default();
        record.mtime = mtime;
        self.carry_over_minified(&record.output);
        self.current.input_paths.insert(path.to_string(), record);
        self.current.files_with_errors.insert(path.to_string());
    }

    /// Source other than `except` whose record in this build defines `name`.
    #[must_use]
    pub fn module_owner(&self, name: &str, except: &str) -> Option<&str> {
        self.current
            .input_paths
            .iter()
            .find(|(path, record)| path.as_str() != except && record.modules.iter().any(|m| m == name))
            .map(|(path, _)| path.as_str())
    }

    /// Copy the previous record of an unchanged source into this build.
    ///
    /// Returns `false` when there is no previous record.
    pub fn carry_over(&mut self, path: &str) -> bool {
        let Some(record) = self.previous.input_paths.get(path).cloned() else {
            return false;
        };
        self.carry_over_minified(&record.output);
        if self.previous.files_with_errors.contains(path) {
            self.current.files_with_errors.insert(path.to_string());
        }
        self.current.input_paths.insert(path.to_string(), record);
        true
    }

    /// Carry over every previous record whose source path is rejected by
    /// `in_scope`, together with generated outputs outside the scope.
    ///
    /// Used by patch builds to leave other interface modules untouched.
    pub fn carry_over_out_of_scope<F>(&mut self, in_scope: F)
    where
        F: Fn(&str) -> bool,
    {
        let paths: Vec<String> =
            self.previous.input_paths.keys().filter(|p| !in_scope(p)).cloned().collect();
        for path in paths {
            self.carry_over(&path);
        }
        let generated: Vec<String> =
            self.previous.generated.iter().filter(|p| !in_scope(p)).cloned().collect();
        self.current.generated.extend(generated);
    }

    fn carry_over_minified(&mut self, outputs: &[String]) {
        for output in outputs {
            let min = minified_path(output);
            if let Some(entry) = self.previous.cached_minified.get(&min) {
                self.current.cached_minified.insert(min, entry.clone());
            }
        }
    }

    /// Hash recorded last build for the minified sibling `min_path`.
    #[must_use]
    pub fn minified_hash(&self, min_path: &str) -> Option<&str> {
        self.previous.cached_minified.get(min_path).map(|e| e.hash.as_str())
    }

    /// Record a minified output and the hash of the text it came from.
    pub fn record_minified(&mut self, min_path: impl Into<String>, hash: impl Into<String>) {
        self.current
            .cached_minified
            .insert(min_path.into(), MinifiedEntry { hash: hash.into() });
    }

    /// Record a metadata output not owned by any single source.
    pub fn record_generated(&mut self, path: impl Into<String>) {
        self.current.generated.insert(path.into());
    }

    /// Every output the previous build produced, restricted to `module_filter`.
    #[must_use]
    pub fn previous_output_files(&self, module_filter: Option<&[String]>) -> BTreeSet<String> {
        output_files(&self.previous, module_filter)
    }

    /// Every output this build produced so far, restricted to `module_filter`.
    #[must_use]
    pub fn current_output_files(&self, module_filter: Option<&[String]>) -> BTreeSet<String> {
        output_files(&self.current, module_filter)
    }
}

/// Path of the minified sibling of an output file: `a/b.js` → `a/b.min.js`.
#[must_use]
pub fn minified_path(output: &str) -> String {
    let file_start = output.rfind('/').map_or(0, |i| i + 1);
    match output[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            format!("{}.min{}", &output[..dot], &output[dot..])
        }
        _ => format!("{output}.min"),
    }
}

/// Output set of `data`: source outputs, minified siblings and generated files.
///
/// With a filter, only paths whose first segment names one of the listed
/// interface modules are returned.
fn output_files(data: &StoreData, module_filter: Option<&[String]>) -> BTreeSet<String> {
    let in_filter = |path: &str| {
        module_filter.is_none_or(|modules| {
            let first = path.split('/').next().unwrap_or_default();
            modules.iter().any(|m| m == first)
        })
    };

    data.input_paths
        .values()
        .flat_map(|record| record.output.iter())
        .chain(data.cached_minified.keys())
        .chain(data.generated.iter())
        .filter(|path| in_filter(path.as_str()))
        .cloned()
        .collect()
}
