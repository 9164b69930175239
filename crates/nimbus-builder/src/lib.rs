//! Machine image builder for Nimbus clouds.
//!
//! A build launches a source instance from an existing image with a fresh
//! temporary SSH key, waits for SSH, runs the provisioning chain over that
//! session, and captures the result as a new image. Every remote operation
//! goes through the Nimbus `cloud-client.sh` tool.
//!
//! ```text
//! create_ssh_key ─▶ run_source_instance ─▶ connect_ssh ─▶ provision ─▶ create_image
//!   (temp key)        (cloud-client --run)   (ssh2)        (shell)     (cloud-client --save)
//! ```
//!
//! [`Builder::run`] drives the steps with a [`nimbus_multistep::Runner`];
//! on any failure or cancellation the launched instance is terminated and
//! the temporary files are removed.
//!
//! ```no_run
//! use std::sync::Arc;
//! use nimbus_builder::{BuildHooks, Builder, TracingUi};
//!
//! # async fn demo(raw: serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = Builder::new();
//! builder.prepare(&[raw])?;
//! let artifact = builder.run(BuildHooks::new(Arc::new(TracingUi))).await?;
//! println!("captured {artifact}");
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod builder;
pub mod cloud_client;
pub mod communicator;
pub mod config;
pub mod error;
pub mod keypair;
pub mod keys;
pub mod provision;
pub mod ssh;
pub mod steps;
pub mod template;
pub mod ui;

pub use artifact::Artifact;
pub use builder::{BuildHooks, Builder};
pub use cloud_client::CloudClient;
pub use communicator::{Communicator, Connector, RemoteOutput, Ssh2Connector};
pub use config::Config;
pub use error::{
    ArtifactError, BuildError, CloudClientError, ConfigError, ConnectError, KeyError,
    ProvisionError, Result, TemplateError,
};
pub use provision::{ProvisionChain, Provisioner, ShellProvisioner};
pub use ssh::SshConfig;
pub use template::Template;
pub use ui::{TracingUi, Ui};
