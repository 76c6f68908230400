//! wsbuild - incremental builder and custom packer for AMD interface modules
//!
//! A workspace is a set of *interface modules*: top-level directories whose
//! sources (scripts, stylesheets, templates, localization dictionaries and
//! `.package.json` bundle specifications) are compiled into one output root.
//! Every run rebuilds only what changed since the last one and then packs
//! the compiled modules into bundles.
//!
//! # Architecture Overview
//!
//! ```text
//!            ┌──────────┐   scan    ┌──────────────┐   compile   ┌──────────┐
//!  sources ─▶│  store   │──────────▶│ orchestrator │────────────▶│   pool   │
//!            └──────────┘ classify  └──────────────┘  results    └──────────┘
//!                 ▲                        │
//!          persist│                        ▼
//!            ┌──────────┐           ┌──────────────┐   bundles   ┌──────────┐
//!            │  cache   │◀──────────│    graph     │────────────▶│  packer  │
//!            └──────────┘           └──────────────┘             └──────────┘
//! ```
//!
//! - [`store`] - per-file records and change classification between runs
//! - [`graph`] - the module dependency graph and its topological closure
//! - [`compiler`] - format-specific compilers and the minifier behind one trait
//! - [`pool`] - bounded worker pool with per-task timeouts
//! - [`packer`] - bundle specifications, precedence, intersects and emission
//! - [`cache`] - the on-disk cache directory, its lock and output reconciliation
//! - [`orchestrator`] - sequences one build run
//! - [`report`] - the structured build report
//!
//! ## Supporting Modules
//! - [`cli`] - the `wsbuild` command line
//! - [`config`] - build configuration loading and validation
//! - [`core`] - error types and module-name helpers
//! - [`utils`] - atomic file writes, hashing, progress display
//!
//! # Configuration
//!
//! ```json
//! {
//!   "cache": ".wsbuild-cache",
//!   "output": "build",
//!   "modules": [
//!     { "name": "Controls", "path": "src/Controls" },
//!     { "name": "Types", "path": "src/Types" }
//!   ],
//!   "minimize": true,
//!   "customPack": true
//! }
//! ```
//!
//! # Command-Line Usage
//!
//! ```bash
//! wsbuild build --config wsbuild.json
//! wsbuild build --config wsbuild.json --patch Controls
//! wsbuild cache info --config wsbuild.json
//! ```

pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod core;
pub mod graph;
pub mod orchestrator;
pub mod packer;
pub mod pool;
pub mod report;
pub mod store;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
