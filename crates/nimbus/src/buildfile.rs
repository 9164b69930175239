//! TOML build files.
//!
//! ```toml
//! [builder]
//! source_image = "base.img"
//! # ...
//!
//! [[provisioner]]
//! inline = ["sudo apt-get update", "echo done"]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use nimbus_builder::{ProvisionChain, ShellProvisioner};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildFile {
    /// Raw builder configuration; validated by the builder itself.
    pub builder: toml::Table,
    #[serde(default)]
    pub provisioner: Vec<ProvisionerDef>,
}

/// A shell provisioner.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionerDef {
    pub inline: Vec<String>,
}

impl BuildFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read build file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid build file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The `[builder]` table as a raw configuration map.
    pub fn raw_config(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.builder).context("failed to convert [builder] table")
    }

    pub fn provisioners(&self) -> ProvisionChain {
        self.provisioner
            .iter()
            .fold(ProvisionChain::new(), |chain, def| {
                chain.with(ShellProvisioner::new(def.inline.clone()))
            })
    }
}
