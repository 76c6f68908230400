//! wsbuild CLI entry point
//!
//! Parses arguments, sets up logging, runs the command and maps its outcome
//! to a process exit code.

use anyhow::Result;
use clap::Parser;
use wsbuild::cli;
use wsbuild::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    cli.init_logging();

    match cli.execute().await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
