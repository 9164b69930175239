//! Build command - runs the full image build.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use console::style;
use nimbus_builder::{BuildError, BuildHooks, Builder, Ui};
use serde_json::json;
use tracing::info;

use crate::buildfile::BuildFile;
use crate::ui::{ConsoleUi, StdinPause};

/// Arguments for the build command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build file (TOML)
    pub file: PathBuf,

    /// Pause after every step and keep the temporary private key
    #[arg(long)]
    pub debug: bool,
}

/// Run the build command.
pub async fn run(args: BuildArgs) -> Result<()> {
    let file = BuildFile::load(&args.file)?;

    let mut raws = vec![file.raw_config()?];
    if args.debug {
        raws.push(json!({ "packer_debug": true }));
    }

    let mut builder = Builder::new();
    let config = builder.prepare(&raws)?;
    let debug = config.debug;
    let ui = Arc::new(ConsoleUi::new(config.build_name.clone()));

    let mut hooks =
        BuildHooks::new(Arc::clone(&ui) as Arc<dyn Ui>).with_provisioners(file.provisioners());
    if debug {
        hooks = hooks.with_pause(Arc::new(StdinPause::new(Arc::clone(&ui))));
    }

    let builder = Arc::new(builder);
    let interrupt = {
        let builder = Arc::clone(&builder);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                builder.cancel();
            }
        })
    };

    let result = builder.run(hooks).await;
    interrupt.abort();

    match result {
        Ok(artifact) => {
            println!();
            println!(
                "{} {}",
                style("Build finished. Image:").green().bold(),
                artifact
            );
            Ok(())
        }
        Err(BuildError::Cancelled) => bail!("build was cancelled"),
        Err(e) => Err(e).context("build failed"),
    }
}
