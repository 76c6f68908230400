//! The `cache` command: inspect or remove the build cache.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::GlobalOptions;
use crate::cache::{CacheInfo, CacheManager};
use crate::config::BuildConfig;

/// Manage the build cache of one configuration.
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

/// Cache operations.
#[derive(Debug, Subcommand)]
pub enum CacheSubcommand {
    /// Show what the cache holds without modifying it
    Info {
        /// Build configuration file (.json or .toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Remove the cache directory so the next build is a full build
    Clean {
        /// Build configuration file (.json or .toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

impl CacheCommand {
    /// Run the cache operation.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be loaded, or when
    /// `clean` runs while a build holds the lock.
    pub async fn execute(self, options: GlobalOptions) -> Result<()> {
        match self.command {
            CacheSubcommand::Info { config } => {
                let info = manager(&config).await?.info().await?;
                print_info(&info);
            }
            CacheSubcommand::Clean { config } => {
                let manager = manager(&config).await?;
                let removed = manager.clean().await?;
                if !options.quiet {
                    if removed {
                        println!("{} Removed {}", "✓".green(), manager.cache_dir().display());
                    } else {
                        println!("Nothing to clean at {}", manager.cache_dir().display());
                    }
                }
            }
        }
        Ok(())
    }
}

async fn manager(config: &Path) -> Result<CacheManager> {
    let config = BuildConfig::load(config).await?;
    Ok(CacheManager::new(Arc::new(config)))
}

fn print_info(info: &CacheInfo) {
    println!("{}", "Build cache".bold());
    println!("  directory:   {}", info.cache_dir.display());
    println!("  sources:     {}", info.records);
    println!("  outputs:     {}", info.outputs);
    println!("  graph nodes: {}", info.graph_nodes);
    println!("  locked:      {}", if info.locked { "yes".yellow() } else { "no".normal() });
    match &info.first_build_reason {
        Some(reason) => println!("  next build:  {} ({reason})", "full".yellow()),
        None => println!("  next build:  incremental"),
    }
    if !info.failed_files.is_empty() {
        println!("  failed in last run:");
        for file in &info.failed_files {
            println!("    {}", file.red());
        }
    }
}
