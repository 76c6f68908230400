//! Integration test suite for wsbuild
//!
//! End-to-end runs of the builder against temporary workspaces.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **incremental**: change detection, removal, retries, lock handling
//! - **packing**: custom bundles, routes, intersects, libraries
//! - **patch**: builds restricted to a subset of interface modules
//! - **cli**: the `wsbuild` binary

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod incremental;
mod packing;
mod patch;
