//! SSH address and credential suppliers for the connect step.

use nimbus_multistep::StateBag;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;

use crate::error::BuildError;
use crate::keys::{CONFIG, HOSTNAME, PRIVATE_KEY};

/// Resolves the `host:port` to connect to.
pub type AddressFn = Box<dyn Fn(&StateBag) -> Result<String, BuildError> + Send + Sync>;

/// Supplies credentials for the connection.
pub type AuthFn = Box<dyn Fn(&StateBag) -> Result<SshConfig, BuildError> + Send + Sync>;

/// Credentials for an SSH connection.
#[derive(Clone)]
pub struct SshConfig {
    pub username: String,
    private_key: String,
}

impl SshConfig {
    pub fn new(username: impl Into<String>, private_pem: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            private_key: private_pem.into(),
        }
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// `hostname:port` of the launched instance.
///
/// # Errors
///
/// [`BuildError::InstanceUnknown`] when the launch output never announced a
/// hostname.
pub fn ssh_address(state: &StateBag) -> Result<String, BuildError> {
    let config = state.get(CONFIG)?;
    let host = state
        .get_ok(HOSTNAME)
        .ok_or(BuildError::InstanceUnknown("hostname"))?;
    Ok(format!("{host}:{}", config.ssh_port))
}

/// Credential supplier logging in as `username` with the temporary key.
pub fn ssh_config(username: String) -> AuthFn {
    Box::new(move |state| {
        let pem = state.get(PRIVATE_KEY)?;
        // A bad key should fail here rather than on every connection attempt.
        RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| BuildError::SshConfig(e.to_string()))?;
        Ok(SshConfig::new(username.clone(), pem.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use nimbus_multistep::StateError;
    use std::sync::Arc;

    fn config() -> Arc<Config> {
        let raw = serde_json::json!({
            "source_image": "base.img",
            "ssh_username": "root",
            "ssh_port": 2200,
            "image_name": "img",
            "cloud_client_path": "/opt/cc",
            "factory": "f",
            "repository": "r",
            "factory_identity": "fi",
            "s3id": "id",
            "s3key": "key",
            "canonicalid": "cid",
            "cert": "c",
            "key": "k",
        });
        Arc::new(Config::prepare(&[raw]).unwrap())
    }

    #[test]
    fn test_address_uses_announced_hostname() {
        let state = StateBag::new();
        state.put(CONFIG, config());
        state.put(HOSTNAME, "10.0.0.5".to_string());
        assert_eq!(ssh_address(&state).unwrap(), "10.0.0.5:2200");
    }

    #[test]
    fn test_missing_hostname_is_distinct_failure() {
        let state = StateBag::new();
        state.put(CONFIG, config());
        let err = ssh_address(&state).unwrap_err();
        assert!(matches!(err, BuildError::InstanceUnknown("hostname")));
    }

    #[test]
    fn test_auth_requires_private_key() {
        let auth = ssh_config("root".to_string());
        let err = auth(&StateBag::new()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::State(StateError::Missing {
                key: "private-key-material"
            })
        ));
    }

    #[test]
    fn test_auth_rejects_unparseable_key() {
        let state = StateBag::new();
        state.put(PRIVATE_KEY, Arc::new("not a key".to_string()));
        let err = ssh_config("root".to_string())(&state).unwrap_err();
        assert!(err.to_string().starts_with("error setting up SSH config"));
    }
}
