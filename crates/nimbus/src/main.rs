//! Nimbus image builder
//!
//! Main entry point for the `nimbus` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod buildfile;
mod commands;
mod ui;

use commands::{build, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Nimbus image builder - captures provisioned Nimbus instances as images
#[derive(Parser)]
#[command(name = "nimbus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for the JSON log file
    #[arg(long, global = true, env = "NIMBUS_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an image from a build file
    Build(build::BuildArgs),

    /// Check a build file without building
    Validate(validate::ValidateArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + daily JSON file
    let filter = if cli.verbose {
        "nimbus=debug,nimbus_builder=debug,nimbus_multistep=debug,info"
    } else {
        "nimbus=info,nimbus_builder=info,nimbus_multistep=info,warn"
    };

    let log_dir = cli.log_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .map(|d| d.join("nimbus").join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    });
    let file_appender = tracing_appender::rolling::daily(&log_dir, "nimbus.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "nimbus=trace,nimbus_builder=trace,nimbus_multistep=trace,info",
                )),
        )
        .init();

    match cli.command {
        Commands::Build(args) => build::run(args).await,
        Commands::Validate(args) => validate::run(args),
    }
}
