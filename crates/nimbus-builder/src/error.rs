//! Error types for the Nimbus builder.

use std::path::PathBuf;
use std::time::Duration;

use nimbus_multistep::{RunnerError, StateError, StepFailure};
use thiserror::Error;

/// Result type for builder operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Problems found while preparing the configuration.
///
/// [`prepare`](crate::Config::prepare) always returns the aggregated
/// [`ConfigError::Multiple`] so callers see every problem at once.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Input could not be decoded into the configuration record.
    #[error("failed to decode configuration: {0}")]
    Decode(String),

    /// Key is not part of the configuration schema.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    /// Required field is absent or empty.
    #[error("{0} must be specified")]
    Missing(&'static str),

    #[error("failed parsing ssh_timeout: {0}")]
    SshTimeout(String),

    #[error("failed parsing image_name: {0}")]
    ImageName(TemplateError),

    #[error("lease_hours must be at least 1")]
    LeaseHours,

    /// Every problem found, in detection order.
    #[error("{} error(s) occurred:\n{}", .0.len(), bullet_list(.0))]
    Multiple(Vec<ConfigError>),
}

impl ConfigError {
    /// The individual problems carried by this error.
    pub fn errors(&self) -> &[ConfigError] {
        match self {
            Self::Multiple(errors) => errors,
            other => std::slice::from_ref(other),
        }
    }
}

fn bullet_list(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("* {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Template syntax and rendering errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),

    #[error("empty action at byte {0}")]
    EmptyAction(usize),

    #[error("unsupported action '{0}', expected a field reference like {{{{ .Name }}}}")]
    BadAction(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Failures invoking the external cloud client.
#[derive(Debug, Error)]
pub enum CloudClientError {
    /// The client script is missing or not executable.
    #[error("cloud client not found at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to run cloud client '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cloud client exited with code {code}{}", stderr_suffix(.stderr))]
    Exit { code: i32, stderr: String },

    /// The call was interrupted by build cancellation. `stdout` holds what
    /// the tool printed before it was killed.
    #[error("cloud client call was cancelled")]
    Cancelled { stdout: String },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Key pair generation and encoding errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key size {0} is below the 2048-bit minimum")]
    TooSmall(usize),

    #[error("failed to generate RSA key: {0}")]
    Generate(#[from] rsa::Error),

    #[error("failed to encode private key: {0}")]
    EncodePrivate(String),

    #[error("failed to encode public key: {0}")]
    EncodePublic(#[from] ssh_key::Error),
}

/// Remote shell connection and command errors.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to resolve '{0}'")]
    Resolve(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("SSH authentication as '{0}' was rejected")]
    AuthRejected(String),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Provisioning chain failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioner '{provisioner}' command '{command}' exited with status {status}{}", stderr_suffix(.stderr))]
    CommandFailed {
        provisioner: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("provisioner '{provisioner}' lost the remote connection: {source}")]
    Remote {
        provisioner: String,
        #[source]
        source: ConnectError,
    },
}

/// Artifact operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    /// Remote image deletion is not implemented.
    #[error("destroying image '{0}' is not implemented")]
    DestroyUnsupported(String),
}

/// Everything that can end a build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// `run` was called before a successful `prepare`.
    #[error("builder has not been prepared")]
    NotPrepared,

    /// A step read a state entry an earlier step should have written.
    #[error("internal state contract violated: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("cloud client unavailable: {0}")]
    CloudClient(#[source] CloudClientError),

    #[error("error creating temporary ssh key: {0}")]
    KeyGeneration(#[source] KeyError),

    #[error("error saving debug key {}: {source}", .path.display())]
    DebugKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error preparing public SSH key: {0}")]
    PublicKeyFile(#[source] std::io::Error),

    #[error("error preparing cloud config file: {0}")]
    CloudConf(#[source] std::io::Error),

    #[error("error launching source instance: {0}")]
    Launch(#[source] CloudClientError),

    #[error("error terminating instance {instance_id}, may still be around: {source}")]
    Terminate {
        instance_id: String,
        #[source]
        source: CloudClientError,
    },

    #[error("error creating the image: {0}")]
    CreateImage(#[source] CloudClientError),

    /// The launch output never announced this value, so the instance cannot
    /// be reached or captured.
    #[error("deploy failed: {0} of the source instance is unknown")]
    InstanceUnknown(&'static str),

    #[error("error setting up SSH config: {0}")]
    SshConfig(String),

    #[error("timeout waiting for SSH after {}", humantime::format_duration(.0.to_owned()))]
    SshTimeout(Duration),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Failure recorded by a halting step.
    #[error(transparent)]
    Step(StepFailure),

    #[error("build was cancelled")]
    Cancelled,

    #[error("build finished without producing an image")]
    NoImage,

    #[error("background task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_lists_every_error() {
        let err = ConfigError::Multiple(vec![
            ConfigError::Missing("source_image"),
            ConfigError::LeaseHours,
        ]);
        assert_eq!(
            err.to_string(),
            "2 error(s) occurred:\n* source_image must be specified\n* lease_hours must be at least 1"
        );
        assert_eq!(err.errors().len(), 2);
        assert_eq!(ConfigError::LeaseHours.errors(), &[ConfigError::LeaseHours]);
    }

    #[test]
    fn test_exit_error_includes_stderr_when_present() {
        let with = CloudClientError::Exit {
            code: 2,
            stderr: "quota exceeded".into(),
        };
        assert_eq!(with.to_string(), "cloud client exited with code 2: quota exceeded");

        let without = CloudClientError::Exit {
            code: 2,
            stderr: String::new(),
        };
        assert_eq!(without.to_string(), "cloud client exited with code 2");
    }

    #[test]
    fn test_launch_error_wraps_cloud_client_text() {
        let err = BuildError::Launch(CloudClientError::Exit {
            code: 1,
            stderr: "no such image".into(),
        });
        assert_eq!(
            err.to_string(),
            "error launching source instance: cloud client exited with code 1: no such image"
        );
    }

    #[test]
    fn test_ssh_timeout_display() {
        let err = BuildError::SshTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "timeout waiting for SSH after 1m");
    }
}
