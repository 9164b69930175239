//! Builder configuration.
//!
//! Raw input is one or more JSON objects, merged left to right. The schema
//! is closed: unknown keys are reported alongside every other problem in a
//! single [`ConfigError::Multiple`].

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::template::Template;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_TIMEOUT: &str = "1m";
pub const DEFAULT_BUILD_NAME: &str = "nimbus";
pub const DEFAULT_LEASE_HOURS: u32 = 1;

/// Fields available to the `image_name` template.
pub const IMAGE_NAME_FIELDS: &[&str] = &["CreateTime"];

/// Every key the configuration accepts.
pub const KNOWN_KEYS: &[&str] = &[
    "source_image",
    "ssh_username",
    "ssh_port",
    "ssh_timeout",
    "image_name",
    "cloud_client_path",
    "factory",
    "repository",
    "factory_identity",
    "s3id",
    "s3key",
    "canonicalid",
    "cert",
    "key",
    "packer_debug",
    "packer_build_name",
    "public_image",
    "lease_hours",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    source_image: String,
    ssh_username: String,
    ssh_port: Option<u16>,
    ssh_timeout: Option<String>,
    image_name: String,
    cloud_client_path: String,
    factory: String,
    repository: String,
    factory_identity: String,
    s3id: String,
    s3key: String,
    canonicalid: String,
    cert: String,
    key: String,
    packer_debug: bool,
    packer_build_name: Option<String>,
    public_image: bool,
    lease_hours: Option<u32>,
}

/// Validated builder configuration.
#[derive(Clone)]
pub struct Config {
    pub source_image: String,
    pub ssh_username: String,
    pub ssh_port: u16,
    pub ssh_timeout: Duration,
    image_name: Template,
    /// Nimbus cloud client installation directory.
    pub cloud_client_path: PathBuf,
    pub factory: String,
    pub repository: String,
    pub factory_identity: String,
    pub s3id: String,
    pub s3key: String,
    pub canonicalid: String,
    /// Path to the user certificate.
    pub cert: String,
    /// Path to the user certificate's private key.
    pub key: String,
    pub debug: bool,
    pub build_name: String,
    /// Publish the captured image to the common repository.
    pub public_image: bool,
    pub lease_hours: u32,
}

impl Config {
    /// Merge and validate raw configuration maps.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Multiple`] listing every problem found.
    pub fn prepare(raws: &[Value]) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let mut merged = Map::new();
        for raw in raws {
            match raw {
                Value::Object(map) => {
                    merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Value::Null => {}
                other => errors.push(ConfigError::Decode(format!(
                    "expected a key/value map, got {}",
                    value_kind(other)
                ))),
            }
        }

        let mut unknown: Vec<&String> = merged
            .keys()
            .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
            .collect();
        unknown.sort();
        errors.extend(unknown.into_iter().map(|k| ConfigError::UnknownKey(k.clone())));
        merged.retain(|k, _| KNOWN_KEYS.contains(&k.as_str()));

        let raw: RawConfig = match serde_json::from_value(Value::Object(merged)) {
            Ok(raw) => raw,
            Err(e) => {
                errors.push(ConfigError::Decode(e.to_string()));
                return Err(ConfigError::Multiple(errors));
            }
        };

        let required = [
            ("source_image", &raw.source_image),
            ("ssh_username", &raw.ssh_username),
            ("image_name", &raw.image_name),
            ("cloud_client_path", &raw.cloud_client_path),
            ("factory", &raw.factory),
            ("repository", &raw.repository),
            ("factory_identity", &raw.factory_identity),
            ("s3id", &raw.s3id),
            ("s3key", &raw.s3key),
            ("canonicalid", &raw.canonicalid),
            ("cert", &raw.cert),
            ("key", &raw.key),
        ];
        for (name, value) in required {
            if value.is_empty() {
                errors.push(ConfigError::Missing(name));
            }
        }

        let raw_timeout = raw
            .ssh_timeout
            .as_deref()
            .filter(|timeout| !timeout.is_empty())
            .unwrap_or(DEFAULT_SSH_TIMEOUT);
        let ssh_timeout = match humantime::parse_duration(raw_timeout) {
            Ok(timeout) => timeout,
            Err(e) => {
                errors.push(ConfigError::SshTimeout(e.to_string()));
                Duration::ZERO
            }
        };

        let image_name = if raw.image_name.is_empty() {
            None
        } else {
            match Template::parse(&raw.image_name)
                .and_then(|t| t.ensure_fields(IMAGE_NAME_FIELDS).map(|()| t))
            {
                Ok(template) => Some(template),
                Err(e) => {
                    errors.push(ConfigError::ImageName(e));
                    None
                }
            }
        };

        let lease_hours = raw.lease_hours.unwrap_or(DEFAULT_LEASE_HOURS);
        if lease_hours < 1 {
            errors.push(ConfigError::LeaseHours);
        }

        let image_name = match image_name {
            Some(template) if errors.is_empty() => template,
            _ => return Err(ConfigError::Multiple(errors)),
        };

        Ok(Self {
            source_image: raw.source_image,
            ssh_username: raw.ssh_username,
            ssh_port: raw.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            ssh_timeout,
            image_name,
            cloud_client_path: PathBuf::from(raw.cloud_client_path),
            factory: raw.factory,
            repository: raw.repository,
            factory_identity: raw.factory_identity,
            s3id: raw.s3id,
            s3key: raw.s3key,
            canonicalid: raw.canonicalid,
            cert: raw.cert,
            key: raw.key,
            debug: raw.packer_debug,
            build_name: raw
                .packer_build_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_BUILD_NAME.to_string()),
            public_image: raw.public_image,
            lease_hours,
        })
    }

    /// The parsed `image_name` template.
    pub fn image_name(&self) -> &Template {
        &self.image_name
    }

    /// Where debug mode saves the temporary private key.
    pub fn debug_key_path(&self) -> PathBuf {
        PathBuf::from(format!("nimbus_{}.pem", self.build_name))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("source_image", &self.source_image)
            .field("ssh_username", &self.ssh_username)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_timeout", &self.ssh_timeout)
            .field("image_name", &self.image_name.source())
            .field("cloud_client_path", &self.cloud_client_path)
            .field("factory", &self.factory)
            .field("repository", &self.repository)
            .field("factory_identity", &self.factory_identity)
            .field("s3id", &self.s3id)
            .field("s3key", &"<redacted>")
            .field("canonicalid", &self.canonicalid)
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("debug", &self.debug)
            .field("build_name", &self.build_name)
            .field("public_image", &self.public_image)
            .field("lease_hours", &self.lease_hours)
            .finish()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
