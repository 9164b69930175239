use async_trait::async_trait;
use nimbus_multistep::{StateBag, Step, StepAction};

use crate::error::Result;
use crate::keys::{COMMUNICATOR, PROVISIONERS, UI};

const READS: &[&str] = &[UI.name(), COMMUNICATOR.name(), PROVISIONERS.name()];

/// Runs the host's provisioning chain over the SSH session.
#[derive(Debug, Default)]
pub struct StepProvision;

impl StepProvision {
    async fn run(&self, state: &StateBag) -> Result<()> {
        let ui = state.get(UI)?;
        let comm = state.get(COMMUNICATOR)?;
        let chain = state.get(PROVISIONERS)?;

        if chain.is_empty() {
            tracing::debug!("no provisioners configured");
            return Ok(());
        }
        ui.say("Provisioning the source instance...");
        chain.run(ui.as_ref(), comm.as_ref()).await?;
        Ok(())
    }
}

#[async_trait]
impl Step for StepProvision {
    fn name(&self) -> &str {
        "provision"
    }

    fn reads(&self) -> &'static [&'static str] {
        READS
    }

    async fn execute(&mut self, state: &StateBag) -> StepAction {
        match self.run(state).await {
            Ok(()) => StepAction::Continue,
            Err(err) => super::fail(state, self.name(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::{Communicator, RemoteOutput};
    use crate::error::{BuildError, ConnectError, ProvisionError};
    use crate::provision::{ProvisionChain, ShellProvisioner};
    use crate::ui::{TracingUi, Ui};
    use nimbus_multistep::ERROR;
    use std::sync::Arc;

    struct Broken;

    #[async_trait]
    impl Communicator for Broken {
        async fn execute(&self, _command: &str) -> std::result::Result<RemoteOutput, ConnectError> {
            Err(ConnectError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "session closed",
            )))
        }
    }

    fn state(chain: ProvisionChain) -> StateBag {
        let state = StateBag::new();
        let ui: Arc<dyn Ui> = Arc::new(TracingUi);
        let comm: Arc<dyn Communicator> = Arc::new(Broken);
        state.put(UI, ui);
        state.put(COMMUNICATOR, comm);
        state.put(PROVISIONERS, Arc::new(chain));
        state
    }

    #[tokio::test]
    async fn test_chain_error_is_preserved() {
        let state = state(ProvisionChain::new().with(ShellProvisioner::new(vec!["uptime".into()])));
        let mut step = StepProvision;

        assert_eq!(step.execute(&state).await, StepAction::Halt);
        let err = state.get(ERROR).unwrap();
        assert_eq!(
            err.to_string(),
            "provisioner 'shell' lost the remote connection: IO error: session closed"
        );
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Provision(ProvisionError::Remote { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_chain_never_touches_session() {
        let state = state(ProvisionChain::new());
        assert_eq!(StepProvision.execute(&state).await, StepAction::Continue);
    }
}
