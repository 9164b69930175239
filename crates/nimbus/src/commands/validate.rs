//! Validate command - checks a build file without touching the cloud.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use nimbus_builder::Config;

use crate::buildfile::BuildFile;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Build file (TOML)
    pub file: PathBuf,
}

/// Run the validate command.
pub fn run(args: ValidateArgs) -> Result<()> {
    let file = BuildFile::load(&args.file)?;
    let config = Config::prepare(&[file.raw_config()?])?;

    println!("{}", style("Build file configuration is valid.").green());
    println!("  {} {}", style("Build:").dim(), config.build_name);
    println!("  {} {}", style("Source image:").dim(), config.source_image);
    println!("  {} {}", style("Image name:").dim(), config.image_name().source());
    println!(
        "  {} {}",
        style("Provisioners:").dim(),
        file.provisioners().len()
    );
    Ok(())
}
