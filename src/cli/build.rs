//! The `build` command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::GlobalOptions;
use crate::config::BuildConfig;
use crate::orchestrator::{BuildOutcome, Builder};

/// Run one incremental build.
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Build configuration file (.json or .toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Only rebuild these interface modules (repeatable)
    #[arg(long = "patch", value_name = "MODULE")]
    pub patch: Vec<String>,

    /// Override the number of worker tasks
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,
}

impl BuildCommand {
    /// Load the configuration, apply the command-line overrides and build.
    ///
    /// Returns 1 when any source failed to compile, 0 otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the run aborts.
    pub async fn execute(self, options: GlobalOptions) -> Result<i32> {
        let mut config = BuildConfig::load(&self.config).await?;
        if !self.patch.is_empty() {
            config.modules_for_patch = self.patch;
        }
        if self.max_workers.is_some() {
            config.max_workers = self.max_workers;
        }

        let outcome = Builder::new(config)?.with_progress(options.progress).run().await?;
        if !options.quiet {
            print_summary(&outcome);
        }
        Ok(outcome.exit_code())
    }
}

fn print_summary(outcome: &BuildOutcome) {
    let kind = if outcome.first_build { "Full build" } else { "Incremental build" };
    if outcome.failed_files.is_empty() {
        println!("{} {}", "✓".green(), format!("{kind} complete").green().bold());
    } else {
        println!("{} {}", "✗".red(), format!("{kind} finished with errors").red().bold());
    }
    println!("  {} compiled, {} unchanged", outcome.processed, outcome.unchanged);
    if !outcome.removed_sources.is_empty() {
        println!("  {} sources removed", outcome.removed_sources.len());
    }
    if !outcome.deleted_outputs.is_empty() {
        println!("  {} stale outputs deleted", outcome.deleted_outputs.len());
    }
    if outcome.bundles > 0 {
        println!("  {} bundles packed", outcome.bundles);
    }
    for file in &outcome.failed_files {
        println!("  {} {}", "failed:".red(), file);
    }
    if let Some(path) = &outcome.report_path {
        println!("  report: {}", path.display().to_string().dimmed());
    }
}
