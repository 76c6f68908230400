//! Command-line interface for wsbuild.
//!
//! Each command lives in its own module with its own argument struct and an
//! `execute` method:
//!
//! - `build` - Run one incremental build (optionally a patch build)
//! - `cache info` - Show what the cache directory holds
//! - `cache clean` - Remove the cache directory
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug output
//! - `--quiet` - Only print errors
//! - `--no-progress` - Disable the progress bar
//!
//! `RUST_LOG` overrides the level picked from `--verbose`/`--quiet`.
//!
//! # Example
//!
//! ```bash
//! # Full or incremental build
//! wsbuild build --config wsbuild.json
//!
//! # Rebuild only two interface modules
//! wsbuild build --config wsbuild.json --patch Controls --patch Types
//!
//! # Start over
//! wsbuild cache clean --config wsbuild.json
//! ```

mod build;
mod cache;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

pub use build::BuildCommand;
pub use cache::{CacheCommand, CacheSubcommand};

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(
    name = "wsbuild",
    about = "Incremental build and custom packing of interface modules",
    version,
    long_about = "wsbuild compiles the sources of AMD interface modules into an output directory, \
                  rebuilding only what changed since the last run, and packs them into bundles \
                  described by .package.json specifications."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable the progress bar
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the configured interface modules
    Build(BuildCommand),

    /// Inspect or remove the build cache
    Cache(CacheCommand),
}

/// Options shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalOptions {
    /// Print nothing but errors.
    pub quiet: bool,
    /// Show the progress bar.
    pub progress: bool,
}

impl Cli {
    /// Log level implied by the flags.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }

    /// Install the tracing subscriber. `RUST_LOG` wins over the flags.
    pub fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(format!("wsbuild={}", self.log_level()))
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Run the selected command and return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the command from running at all.
    pub async fn execute(self) -> Result<i32> {
        let options = GlobalOptions {
            quiet: self.quiet,
            progress: !self.no_progress && !self.quiet,
        };

        match self.command {
            Commands::Build(cmd) => cmd.execute(options).await,
            Commands::Cache(cmd) => cmd.execute(options).await.map(|()| 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_build_with_patch_modules() {
        let cli = Cli::try_parse_from([
            "wsbuild",
            "build",
            "--config",
            "ws.json",
            "--patch",
            "Controls",
            "--patch",
            "Types",
            "--max-workers",
            "3",
        ])
        .unwrap();

        let Commands::Build(cmd) = cli.command else {
            panic!("expected build command");
        };
        assert_eq!(cmd.config, PathBuf::from("ws.json"));
        assert_eq!(cmd.patch, vec!["Controls".to_string(), "Types".to_string()]);
        assert_eq!(cmd.max_workers, Some(3));
    }

    #[test]
    fn test_parse_cache_info() {
        let cli = Cli::try_parse_from(["wsbuild", "cache", "info", "--config", "ws.json"]).unwrap();
        let Commands::Cache(cmd) = cli.command else {
            panic!("expected cache command");
        };
        assert!(matches!(cmd.command, CacheSubcommand::Info { .. }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["wsbuild", "build", "-c", "ws.json", "--verbose", "--no-progress"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.no_progress);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["wsbuild", "build", "-c", "ws.json", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_build_requires_config() {
        assert!(Cli::try_parse_from(["wsbuild", "build"]).is_err());
    }

    #[test]
    fn test_zero_workers_left_to_the_pool() {
        let cli = Cli::try_parse_from(["wsbuild", "build", "-c", "ws.json", "--max-workers", "0"]).unwrap();
        let Commands::Build(cmd) = cli.command else {
            panic!("expected build command");
        };
        assert_eq!(cmd.max_workers, Some(0));
    }
}
