use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_multistep::{StateBag, Step, StepAction};
use tracing::{debug, info};

use crate::communicator::{Communicator, Connector};
use crate::error::{BuildError, Result};
use crate::keys::{CANCEL, COMMUNICATOR, UI};
use crate::ssh::{AddressFn, AuthFn, SshConfig};

const READS: &[&str] = &[UI.name(), CANCEL.name()];
const WRITES: &[&str] = &[COMMUNICATOR.name()];

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Waits for SSH on the instance and records the session.
pub struct StepConnectSsh {
    address: AddressFn,
    auth: AuthFn,
    connector: Arc<dyn Connector>,
    timeout: Duration,
    retry_interval: Duration,
}

impl StepConnectSsh {
    pub fn new(
        address: AddressFn,
        auth: AuthFn,
        connector: Arc<dyn Connector>,
        timeout: Duration,
    ) -> Self {
        Self {
            address,
            auth,
            connector,
            timeout,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    async fn run(&mut self, state: &StateBag) -> Result<()> {
        let ui = state.get(UI)?;
        let cancel = state.get(CANCEL)?;
        let address = (self.address)(state)?;
        let config = (self.auth)(state)?;

        ui.say("Waiting for SSH to become available...");
        let comm = tokio::select! {
            result = tokio::time::timeout(self.timeout, self.wait_for_ssh(&address, &config)) => {
                result.map_err(|_| BuildError::SshTimeout(self.timeout))?
            }
            () = cancel.cancelled() => return Err(BuildError::Cancelled),
        };

        ui.say("Connected to SSH!");
        state.put(COMMUNICATOR, comm);
        Ok(())
    }

    async fn wait_for_ssh(&self, address: &str, config: &SshConfig) -> Arc<dyn Communicator> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(address, attempt, "attempting SSH connection");
            match self.connector.connect(address, config).await {
                Ok(comm) => {
                    info!(address, attempt, "SSH connection established");
                    return comm;
                }
                Err(e) => {
                    debug!(address, error = %e, "SSH handshake failed, will retry");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for StepConnectSsh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepConnectSsh")
            .field("timeout", &self.timeout)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepConnectSsh {
    fn name(&self) -> &str {
        "connect_ssh"
    }

    fn reads(&self) -> &'static [&'static str] {
        READS
    }

    fn writes(&self) -> &'static [&'static str] {
        WRITES
    }

    async fn execute(&mut self, state: &StateBag) -> StepAction {
        match self.run(state).await {
            Ok(()) => StepAction::Continue,
            Err(err) => super::fail(state, self.name(), err),
        }
    }
}
