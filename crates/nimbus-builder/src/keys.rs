//! State bag keys shared by the build steps.

use std::path::PathBuf;
use std::sync::Arc;

use nimbus_multistep::{CancellationToken, StateKey};

use crate::cloud_client::CloudClient;
use crate::communicator::Communicator;
use crate::config::Config;
use crate::provision::ProvisionChain;
use crate::ui::Ui;

pub const CONFIG: StateKey<Arc<Config>> = StateKey::new("config");
pub const UI: StateKey<Arc<dyn Ui>> = StateKey::new("ui");
pub const CLOUD_CLIENT: StateKey<Arc<CloudClient>> = StateKey::new("cloud-client");
pub const CANCEL: StateKey<CancellationToken> = StateKey::new("cancel-token");
pub const PROVISIONERS: StateKey<Arc<ProvisionChain>> = StateKey::new("provisioners");

/// PEM-encoded private half of the temporary key pair.
pub const PRIVATE_KEY: StateKey<Arc<String>> = StateKey::new("private-key-material");
/// Temporary file holding the authorized-key line.
pub const PUBLIC_KEY: StateKey<PathBuf> = StateKey::new("public-key-handle");
pub const CLOUD_CONF: StateKey<PathBuf> = StateKey::new("cloud-conf-path");

/// Only present when the launch output announced it.
pub const INSTANCE_ID: StateKey<String> = StateKey::new("remote-instance-id");
/// Only present when the launch output announced it.
pub const HOSTNAME: StateKey<String> = StateKey::new("remote-hostname");

pub const COMMUNICATOR: StateKey<Arc<dyn Communicator>> = StateKey::new("connection-handle");
/// Name of the captured image.
pub const IMAGE: StateKey<String> = StateKey::new("produced-image-id");
