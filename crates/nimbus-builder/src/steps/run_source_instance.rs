use std::fs;
use std::sync::OnceLock;

use async_trait::async_trait;
use nimbus_multistep::{StateBag, Step, StepAction, StepFailure};
use regex::Regex;
use tracing::{debug, warn};

use crate::cloud_client::RunInstance;
use crate::config::Config;
use crate::error::{BuildError, CloudClientError, Result, TemplateError};
use crate::keys::{
    CANCEL, CLOUD_CLIENT, CLOUD_CONF, CONFIG, HOSTNAME, IMAGE, INSTANCE_ID, PUBLIC_KEY, UI,
};
use crate::template::Template;

/// Cloud client configuration written for every build.
pub const CLOUD_CONF_TEMPLATE: &str = "\
vws.factory={{.Factory}}
vws.repository={{.Repository}}
vws.factory.identity={{.FactoryIdentity}}
vws.repository.type=cumulus
vws.repository.s3basekey=VMS
vws.repository.s3bucket=Repo
vws.repository.s3https=false
vws.repository.s3acceptallcerts=false
vws.repository.s3id={{.S3Id}}
vws.repository.s3key={{.S3Key}}
vws.repository.canonicalid={{.CanonicalId}}
nimbus.cert={{.Cert}}
nimbus.key={{.Key}}
";

const READS: &[&str] = &[
    CONFIG.name(),
    UI.name(),
    CLOUD_CLIENT.name(),
    CANCEL.name(),
    PUBLIC_KEY.name(),
];
const WRITES: &[&str] = &[CLOUD_CONF.name(), INSTANCE_ID.name(), HOSTNAME.name()];

/// Render [`CLOUD_CONF_TEMPLATE`] from the configuration.
pub fn render_cloud_conf(config: &Config) -> std::result::Result<String, TemplateError> {
    Template::parse(CLOUD_CONF_TEMPLATE)?.render(|field| {
        let value = match field {
            "Factory" => &config.factory,
            "Repository" => &config.repository,
            "FactoryIdentity" => &config.factory_identity,
            "S3Id" => &config.s3id,
            "S3Key" => &config.s3key,
            "CanonicalId" => &config.canonicalid,
            "Cert" => &config.cert,
            "Key" => &config.key,
            _ => return None,
        };
        Some(value.clone())
    })
}

/// What the launch announced about the new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchInfo {
    pub instance_id: Option<String>,
    pub hostname: Option<String>,
}

/// Scan launch output line by line. A later match overrides an earlier one.
pub fn parse_launch_output(stdout: &str) -> LaunchInfo {
    static WORKSPACE: OnceLock<Option<Regex>> = OnceLock::new();
    static HOST: OnceLock<Option<Regex>> = OnceLock::new();
    let workspace = WORKSPACE.get_or_init(|| Regex::new(r#"Creating workspace "(vm-[0-9]+)""#).ok());
    let host = HOST.get_or_init(|| Regex::new(r"Hostname: (.+)$").ok());

    let mut info = LaunchInfo::default();
    for line in stdout.lines() {
        let captured = |re: &Option<Regex>| {
            re.as_ref()
                .and_then(|re| re.captures(line))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        };
        if let Some(id) = captured(workspace) {
            info.instance_id = Some(id);
        }
        if let Some(hostname) = captured(host) {
            info.hostname = Some(hostname);
        }
    }
    info
}

/// Launches the source instance and terminates it on cleanup unless it was
/// captured.
#[derive(Debug, Default)]
pub struct StepRunSourceInstance {
    instance_id: Option<String>,
}

impl StepRunSourceInstance {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&mut self, state: &StateBag) -> Result<()> {
        let config = state.get(CONFIG)?;
        let ui = state.get(UI)?;
        let client = state.get(CLOUD_CLIENT)?;
        let cancel = state.get(CANCEL)?;
        let public_key = state.get(PUBLIC_KEY)?;

        let conf = render_cloud_conf(&config)?;
        let conf_path = tempfile::Builder::new()
            .prefix("nimbus-cloudconf")
            .tempfile()
            .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error))
            .map_err(BuildError::CloudConf)?;
        // Recorded before writing so the final cleanup always finds it.
        state.put(CLOUD_CONF, conf_path.clone());
        debug!(path = %conf_path.display(), "cloud config path");
        fs::write(&conf_path, conf).map_err(BuildError::CloudConf)?;

        ui.say("Launching a source Nimbus instance...");
        let launched = client
            .run_instance(
                RunInstance {
                    conf: &conf_path,
                    hours: config.lease_hours,
                    image: &config.source_image,
                    ssh_pubkey: &public_key,
                },
                &cancel,
            )
            .await;

        let stdout = match launched {
            Ok(stdout) => stdout,
            Err(CloudClientError::Cancelled { stdout }) => {
                // The workspace may exist already; remember it for cleanup.
                let info = parse_launch_output(&stdout);
                if let Some(id) = &info.instance_id {
                    warn!(instance_id = %id, "launch cancelled after the instance was created");
                    state.put(INSTANCE_ID, id.clone());
                }
                self.instance_id = info.instance_id;
                return Err(BuildError::Launch(CloudClientError::Cancelled { stdout }));
            }
            Err(err) => return Err(BuildError::Launch(err)),
        };

        let info = parse_launch_output(&stdout);
        debug!(instance_id = ?info.instance_id, hostname = ?info.hostname, "parsed launch output");

        match &info.hostname {
            Some(hostname) => state.put(HOSTNAME, hostname.clone()),
            None => warn!("launch output did not announce a hostname"),
        }
        match &info.instance_id {
            Some(id) => {
                ui.message(&format!("Instance ID: {id}"));
                state.put(INSTANCE_ID, id.clone());
            }
            None => warn!("launch output did not announce an instance id"),
        }
        self.instance_id = info.instance_id;
        Ok(())
    }
}

#[async_trait]
impl Step for StepRunSourceInstance {
    fn name(&self) -> &str {
        "run_source_instance"
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

    async fn compensate(&mut self, state: &StateBag) -> std::result::Result<(), StepFailure> {
        let Some(instance_id) = self.instance_id.take() else {
            return Ok(());
        };
        let ui = state.get(UI).map_err(StepFailure::new)?;

        if state.get_ok(IMAGE).is_some() {
            ui.say("Nimbus instance already terminated by image creation...");
            return Ok(());
        }

        ui.say("Terminating the source Nimbus instance...");
        let client = state.get(CLOUD_CLIENT).map_err(StepFailure::new)?;
        let conf = state.get(CLOUD_CONF).map_err(StepFailure::new)?;
        if let Err(source) = client.terminate(&conf, &instance_id).await {
            let err = BuildError::Terminate {
                instance_id,
                source,
            };
            ui.error(&err.to_string());
            return Err(StepFailure::new(err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAUNCH_OUTPUT: &str = "\
Launching workspace.

Workspace Factory Service:
    https://cloud.example.org:8443/wsrf/services/WorkspaceFactoryService

Creating workspace \"vm-123\"... done.

       IP address: 10.0.0.5
       Hostname: 10.0.0.5
       Start time: Mon May 20 14:00:00 CDT 2013
";

    #[test]
    fn test_parse_announced_values() {
        assert_eq!(
            parse_launch_output(LAUNCH_OUTPUT),
            LaunchInfo {
                instance_id: Some("vm-123".into()),
                hostname: Some("10.0.0.5".into()),
            }
        );
    }

    #[test]
    fn test_parse_nothing_announced() {
        assert_eq!(
            parse_launch_output("Launching workspace.\nProblem: quota exceeded\n"),
            LaunchInfo::default()
        );
    }

    #[test]
    fn test_parse_later_lines_win() {
        let info = parse_launch_output(
            "Creating workspace \"vm-1\"\nHostname: a.example\nCreating workspace \"vm-2\"\nHostname: b.example\n",
        );
        assert_eq!(info.instance_id.as_deref(), Some("vm-2"));
        assert_eq!(info.hostname.as_deref(), Some("b.example"));
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        let info = parse_launch_output("Creating workspace \"vm-abc\"\n");
        assert_eq!(info.instance_id, None);
    }

    #[test]
    fn test_render_cloud_conf() {
        let raw = serde_json::json!({
            "source_image": "base.img",
            "ssh_username": "root",
            "image_name": "img",
            "cloud_client_path": "/opt/cc",
            "factory": "cloud.example.org:8443",
            "repository": "cloud.example.org:8888",
            "factory_identity": "/O=Grid/CN=host/cloud.example.org",
            "s3id": "AKID",
            "s3key": "SECRET",
            "canonicalid": "0123-abcd",
            "cert": "/certs/usercert.pem",
            "key": "/certs/userkey.pem",
        });
        let config = Config::prepare(&[raw]).unwrap();
        let conf = render_cloud_conf(&config).unwrap();

        let lines: Vec<&str> = conf.lines().collect();
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0], "vws.factory=cloud.example.org:8443");
        assert_eq!(lines[2], "vws.factory.identity=/O=Grid/CN=host/cloud.example.org");
        assert_eq!(lines[3], "vws.repository.type=cumulus");
        assert_eq!(lines[9], "vws.repository.s3key=SECRET");
        assert_eq!(lines[12], "nimbus.key=/certs/userkey.pem");
        assert!(conf.ends_with('\n'));
    }
}
