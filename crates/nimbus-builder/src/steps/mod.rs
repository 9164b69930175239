//! The five build steps, in pipeline order.

mod connect_ssh;
mod create_image;
mod create_ssh_key;
mod provision;
mod run_source_instance;

pub use connect_ssh::StepConnectSsh;
pub use create_image::{StepCreateImage, render_image_name};
pub use create_ssh_key::StepCreateSshKey;
pub use provision::StepProvision;
pub use run_source_instance::{
    CLOUD_CONF_TEMPLATE, LaunchInfo, StepRunSourceInstance, parse_launch_output, render_cloud_conf,
};

use nimbus_multistep::{StateBag, StepAction, halt};

use crate::error::BuildError;
use crate::keys::UI;

/// Report `err` to the user and halt the run with it.
pub(crate) fn fail(state: &StateBag, step: &str, err: BuildError) -> StepAction {
    tracing::error!(step, error = %err, "step failed");
    if let Some(ui) = state.get_ok(UI) {
        ui.error(&err.to_string());
    }
    halt(state, err)
}
