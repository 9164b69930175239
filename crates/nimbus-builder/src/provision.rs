//! Provisioners that customize the instance before capture.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::communicator::Communicator;
use crate::error::ProvisionError;
use crate::ui::Ui;

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn provision(&self, ui: &dyn Ui, comm: &dyn Communicator) -> Result<(), ProvisionError>;
}

/// Provisioners run in order; the first failure stops the chain.
#[derive(Clone, Default)]
pub struct ProvisionChain {
    provisioners: Vec<Arc<dyn Provisioner>>,
}

impl ProvisionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provisioner: impl Provisioner + 'static) -> Self {
        self.push(Arc::new(provisioner));
        self
    }

    pub fn push(&mut self, provisioner: Arc<dyn Provisioner>) {
        self.provisioners.push(provisioner);
    }

    pub fn len(&self) -> usize {
        self.provisioners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisioners.is_empty()
    }

    pub async fn run(&self, ui: &dyn Ui, comm: &dyn Communicator) -> Result<(), ProvisionError> {
        for provisioner in &self.provisioners {
            info!(provisioner = provisioner.name(), "running provisioner");
            provisioner.provision(ui, comm).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProvisionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.provisioners.iter().map(|p| p.name()))
            .finish()
    }
}

/// Runs inline shell commands one at a time.
#[derive(Debug, Clone)]
pub struct ShellProvisioner {
    inline: Vec<String>,
}

impl ShellProvisioner {
    pub fn new(inline: Vec<String>) -> Self {
        Self { inline }
    }
}

#[async_trait]
impl Provisioner for ShellProvisioner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn provision(&self, ui: &dyn Ui, comm: &dyn Communicator) -> Result<(), ProvisionError> {
        for command in &self.inline {
            ui.say(&format!("Provisioning with shell: {command}"));
            let output = comm
                .execute(command)
                .await
                .map_err(|source| ProvisionError::Remote {
                    provisioner: self.name().to_string(),
                    source,
                })?;

            for line in output.stdout.lines() {
                ui.message(line);
            }
            debug!(command, status = output.exit_status, "remote command finished");

            if !output.success() {
                return Err(ProvisionError::CommandFailed {
                    provisioner: self.name().to_string(),
                    command: command.clone(),
                    status: output.exit_status,
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::RemoteOutput;
    use crate::error::ConnectError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Ui for Journal {
        fn say(&self, message: &str) {
            self.0.lock().push(format!("say:{message}"));
        }
        fn message(&self, message: &str) {
            self.0.lock().push(format!("message:{message}"));
        }
        fn error(&self, message: &str) {
            self.0.lock().push(format!("error:{message}"));
        }
    }

    /// Exits non-zero for any command containing "fail".
    #[derive(Default)]
    struct FakeShell {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Communicator for FakeShell {
        async fn execute(&self, command: &str) -> Result<RemoteOutput, ConnectError> {
            self.commands.lock().push(command.to_string());
            if command.contains("fail") {
                return Ok(RemoteOutput {
                    stdout: String::new(),
                    stderr: "permission denied\n".into(),
                    exit_status: 1,
                });
            }
            Ok(RemoteOutput {
                stdout: format!("ran {command}\n"),
                ..RemoteOutput::default()
            })
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let ui = Journal::default();
        let shell = FakeShell::default();
        let chain = ProvisionChain::new()
            .with(ShellProvisioner::new(vec!["apt-get update".into()]))
            .with(ShellProvisioner::new(vec!["echo done".into()]));
        assert_eq!(chain.len(), 2);

        chain.run(&ui, &shell).await.unwrap();
        assert_eq!(*shell.commands.lock(), vec!["apt-get update", "echo done"]);
        assert_eq!(
            *ui.0.lock(),
            vec![
                "say:Provisioning with shell: apt-get update",
                "message:ran apt-get update",
                "say:Provisioning with shell: echo done",
                "message:ran echo done",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_command_stops_chain() {
        let ui = Journal::default();
        let shell = FakeShell::default();
        let chain = ProvisionChain::new().with(ShellProvisioner::new(vec![
            "make fail".into(),
            "never".into(),
        ]));

        let err = chain.run(&ui, &shell).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "provisioner 'shell' command 'make fail' exited with status 1: permission denied"
        );
        assert_eq!(*shell.commands.lock(), vec!["make fail"]);
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        let chain = ProvisionChain::default();
        assert!(chain.is_empty());
        chain
            .run(&Journal::default(), &FakeShell::default())
            .await
            .unwrap();
    }
}
