//! The build orchestrator.

use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use nimbus_multistep::{CancellationToken, ERROR, Pause, RunOutcome, Runner, StateBag, Step};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::cloud_client::CloudClient;
use crate::communicator::{Connector, Ssh2Connector};
use crate::config::Config;
use crate::error::{BuildError, ConfigError, Result};
use crate::keys::{CANCEL, CLOUD_CLIENT, CLOUD_CONF, CONFIG, IMAGE, PROVISIONERS, UI};
use crate::provision::ProvisionChain;
use crate::ssh;
use crate::steps::{
    StepConnectSsh, StepCreateImage, StepCreateSshKey, StepProvision, StepRunSourceInstance,
};
use crate::ui::Ui;

/// What the host supplies to a run.
#[derive(Clone)]
pub struct BuildHooks {
    pub ui: Arc<dyn Ui>,
    pub provisioners: ProvisionChain,
    /// Consulted after every step when the configuration enables debug mode.
    pub pause: Option<Arc<dyn Pause>>,
}

impl BuildHooks {
    pub fn new(ui: Arc<dyn Ui>) -> Self {
        Self {
            ui,
            provisioners: ProvisionChain::new(),
            pause: None,
        }
    }

    pub fn with_provisioners(mut self, provisioners: ProvisionChain) -> Self {
        self.provisioners = provisioners;
        self
    }

    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = Some(pause);
        self
    }
}

/// Builds one image per [`run`](Builder::run).
pub struct Builder {
    config: Option<Arc<Config>>,
    connector: Arc<dyn Connector>,
    ssh_retry_interval: Option<Duration>,
    running: Mutex<Option<CancellationToken>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Identifier attached to every artifact this builder produces.
    pub const ID: &'static str = "nimbusproject.nimbus";

    pub fn new() -> Self {
        Self::with_connector(Arc::new(Ssh2Connector::default()))
    }

    /// Reach the instance through `connector` instead of libssh2.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            config: None,
            connector,
            ssh_retry_interval: None,
            running: Mutex::new(None),
        }
    }

    pub fn with_ssh_retry_interval(mut self, interval: Duration) -> Self {
        self.ssh_retry_interval = Some(interval);
        self
    }

    /// Validate raw configuration maps. Later maps override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns every configuration problem at once; nothing is touched on
    /// disk or remotely.
    pub fn prepare(&mut self, raws: &[Value]) -> std::result::Result<&Config, ConfigError> {
        let config = Arc::new(Config::prepare(raws)?);
        debug!(config = ?config, "prepared configuration");
        Ok(&**self.config.insert(config))
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_deref()
    }

    /// Run the build pipeline.
    ///
    /// The temporary cloud config file is removed before returning, whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// [`BuildError::Cancelled`] if [`cancel`](Builder::cancel) was called,
    /// otherwise the error recorded by the step that halted.
    pub async fn run(&self, hooks: BuildHooks) -> Result<Artifact> {
        let config = self.config.clone().ok_or(BuildError::NotPrepared)?;
        let client = CloudClient::locate(&config.cloud_client_path).map_err(BuildError::CloudClient)?;
        info!(command = %client.command().display(), "cloud client command path");

        let token = CancellationToken::new();
        *self.running.lock() = Some(token.clone());

        let state = StateBag::new();
        state.put(CONFIG, Arc::clone(&config));
        state.put(UI, Arc::clone(&hooks.ui));
        state.put(CLOUD_CLIENT, Arc::new(client));
        state.put(CANCEL, token.clone());
        state.put(PROVISIONERS, Arc::new(hooks.provisioners));

        let steps = self.steps(&config);
        let runner = match (config.debug, hooks.pause) {
            (true, Some(pause)) => Runner::debug(steps, pause),
            (true, None) => {
                warn!("debug mode requested without a pause handler, running straight through");
                Runner::basic(steps)
            }
            (false, _) => Runner::basic(steps),
        };
        let mut runner = runner.with_cancel_token(token);

        let span = info_span!("build", id = %Uuid::new_v4(), name = %config.build_name);
        let result = runner.run(&state).instrument(span).await;

        *self.running.lock() = None;
        remove_cloud_conf(&state);

        let report = result?;
        for failure in &report.compensation_failures {
            warn!(step = %failure.step, error = %failure.error, "cleanup incomplete");
        }

        match report.outcome {
            RunOutcome::Cancelled => Err(BuildError::Cancelled),
            RunOutcome::Halted { .. } => Err(state
                .get_ok(ERROR)
                .map_or(BuildError::NoImage, BuildError::Step)),
            RunOutcome::Completed => state
                .get_ok(IMAGE)
                .map(Artifact::new)
                .ok_or(BuildError::NoImage),
        }
    }

    /// Cancel the in-flight run, if any.
    pub fn cancel(&self) {
        match self.running.lock().as_ref() {
            Some(token) => {
                info!("Cancelling the step runner...");
                token.cancel();
            }
            None => debug!("cancel requested with no build running"),
        }
    }

    fn steps(&self, config: &Config) -> Vec<Box<dyn Step>> {
        let mut connect = StepConnectSsh::new(
            Box::new(ssh::ssh_address),
            ssh::ssh_config(config.ssh_username.clone()),
            Arc::clone(&self.connector),
            config.ssh_timeout,
        );
        if let Some(interval) = self.ssh_retry_interval {
            connect = connect.with_retry_interval(interval);
        }

        vec![
            Box::new(StepCreateSshKey::new(config.debug, config.debug_key_path())),
            Box::new(StepRunSourceInstance::new()),
            Box::new(connect),
            Box::new(StepProvision),
            Box::new(StepCreateImage::new()),
        ]
    }
}

fn remove_cloud_conf(state: &StateBag) {
    let Some(path) = state.get_ok(CLOUD_CONF) else {
        return;
    };
    match fs::remove_file(&path) {
        Ok(()) => debug!(path = %path.display(), "removed cloud config"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cloud config"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::TracingUi;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_requires_prepare() {
        let builder = Builder::new();
        let err = builder.run(BuildHooks::new(Arc::new(TracingUi))).await.unwrap_err();
        assert!(matches!(err, BuildError::NotPrepared));
    }

    #[test]
    fn test_prepare_reports_aggregate() {
        let mut builder = Builder::new();
        let err = builder.prepare(&[json!({"ssh_port": 22})]).unwrap_err();
        assert_eq!(err.errors().len(), 12);
        assert!(builder.config().is_none());
    }

    #[test]
    fn test_prepare_returns_stored_config() {
        let mut builder = Builder::new();
        let config = builder
            .prepare(&[json!({
                "source_image": "base.img",
                "ssh_username": "root",
                "image_name": "img-{{.CreateTime}}",
                "cloud_client_path": "/opt/cc",
                "factory": "f",
                "repository": "r",
                "factory_identity": "fi",
                "s3id": "id",
                "s3key": "key",
                "canonicalid": "cid",
                "cert": "c",
                "key": "k",
                "packer_build_name": "web",
            })])
            .unwrap();
        assert_eq!(config.source_image, "base.img");
        assert_eq!(config.build_name, "web");
        assert_eq!(builder.config().map(|c| c.build_name.as_str()), Some("web"));
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        Builder::new().cancel();
    }

    #[test]
    fn test_pipeline_order_and_wiring() {
        let mut builder = Builder::new();
        builder
            .prepare(&[json!({
                "source_image": "base.img",
                "ssh_username": "root",
                "image_name": "img-{{.CreateTime}}",
                "cloud_client_path": "/opt/cc",
                "factory": "f",
                "repository": "r",
                "factory_identity": "fi",
                "s3id": "id",
                "s3key": "key",
                "canonicalid": "cid",
                "cert": "c",
                "key": "k",
            })])
            .unwrap();
        let config = builder.config.clone().unwrap();
        let steps = builder.steps(&config);
        let names: Vec<_> = steps.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "create_ssh_key",
                "run_source_instance",
                "connect_ssh",
                "provision",
                "create_image",
            ]
        );

        let state = StateBag::new();
        let seeded = [
            CONFIG.name(),
            UI.name(),
            CLOUD_CLIENT.name(),
            CANCEL.name(),
            PROVISIONERS.name(),
        ];
        for key in seeded {
            // Seed placeholders; the wiring check only looks at names.
            state.put(nimbus_multistep::StateKey::<()>::new(key), ());
        }
        assert!(Runner::basic(steps).validate(&state).is_ok());
    }
}
