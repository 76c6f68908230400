//! Global constants used throughout the wsbuild codebase.
//!
//! This module contains cache document names, timeout durations, and worker
//! pool sizing parameters that are used across multiple modules. Defining
//! them centrally keeps the persisted cache layout discoverable in one place.

use std::time::Duration;

/// Version of the persisted cache layout.
///
/// Bumping this value changes the builder hash stored in `builder-info.json`,
/// which invalidates every cache written by an older layout.
pub const CACHE_FORMAT_VERSION: u32 = 3;

/// Builder identity document: `{ hashOfBuilder, startBuildTime }`.
pub const BUILDER_INFO_FILE: &str = "builder-info.json";

/// Change-detection store: source path → `{ output, dependencies, ... }`.
pub const INPUT_PATHS_FILE: &str = "input-paths.json";

/// Source path → list of source paths it consumes.
pub const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Minified output path → hash of the text it was produced from.
pub const CACHED_MINIFIED_FILE: &str = "cached-minified.json";

/// Source paths whose last processing attempt failed.
pub const FILES_WITH_ERRORS_FILE: &str = "files-with-errors.json";

/// Path-independent configuration of the previous run.
pub const LAST_RUNNING_PARAMETERS_FILE: &str = "last_build_gulp_config.json";

/// Theme assembly metadata, carried through untouched.
pub const THEMES_META_FILE: &str = "themesMeta.json";

/// Persisted dependency graph (`nodes` + `links`).
pub const MODULE_DEPENDENCIES_FILE: &str = "module-dependencies.json";

/// Metadata files produced by the packer, tracked for reconciliation.
pub const GENERATED_OUTPUTS_FILE: &str = "generated-outputs.json";

/// Per-phase timings of the last run.
pub const BUILD_TIMINGS_FILE: &str = "build-timings.json";

/// Effective worker pool configuration of the last run.
pub const WORKER_POOL_CONFIG_FILE: &str = "workerpool-config.json";

/// Presence of this file means another builder process owns the cache.
pub const LOCK_FILE: &str = "builder.lockfile";

/// Structured diagnostics of the last run.
pub const REPORT_FILE: &str = "builder_report.json";

/// Directory (relative to an interface module output) holding builder metadata.
pub const META_FOLDER: &str = ".builder";

/// Aggregated bundle contents, written to `<output>/.builder/`.
pub const BUNDLES_FILE: &str = "bundles.json";

/// Aggregated routing table, written to `<output>/.builder/` and per owning module.
pub const BUNDLES_ROUTE_FILE: &str = "bundlesRoute.json";

/// Per interface module report of contended bundle modules.
pub const INTERSECTS_FILE: &str = "customPackIntersects.json";

/// Per interface module list of library modules.
pub const LIBRARIES_FILE: &str = "libraries.json";

/// Suffix identifying bundle specification documents.
pub const PACKAGE_SPEC_SUFFIX: &str = ".package.json";

/// Suffix of default bundle output paths.
pub const PACKAGE_OUTPUT_SUFFIX: &str = ".package.min";

/// Timeout for a single script compile task (60 seconds).
pub const SCRIPT_COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a single template compile task (60 seconds).
pub const TEMPLATE_COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a single stylesheet compile task (5 minutes).
///
/// Stylesheet compilation is the heaviest per-file task, so it gets the
/// longest budget.
pub const STYLE_COMPILE_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for dictionaries, copies and other light tasks (30 seconds).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single minify task (2 minutes).
pub const MINIFY_TIMEOUT: Duration = Duration::from_secs(120);

/// Default CPU core count when detection fails.
///
/// Used as a fallback when `std::thread::available_parallelism()` returns an error.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Number of in-flight tasks allowed per worker.
///
/// Tasks beyond `workers * TASKS_PER_WORKER` wait in the stream instead of
/// piling up on the semaphore.
pub const TASKS_PER_WORKER: usize = 2;
