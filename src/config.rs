//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::cloud::{Credentials, DEFAULT_API_URL};
use crate::guest::{SshSettings, expand_tilde};
use crate::steps::ServerSpec;
use crate::wait::WaitPolicy;

/// Builder settings derived from environment variables, configuration files,
/// and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "IONOS",
    discovery(
        app_name = "snapwright",
        env_var = "SNAPWRIGHT_CONFIG_PATH",
        config_file_name = "snapwright.toml",
        dotfile_name = ".snapwright.toml",
        project_file_name = "snapwright.toml"
    )
)]
pub struct BuilderConfig {
    /// Account user name for basic authentication.
    pub username: Option<String>,
    /// Account password for basic authentication.
    pub password: Option<String>,
    /// API token. Takes precedence over user name and password.
    pub token: Option<String>,
    /// Cloud API endpoint.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
    /// Region the data center is created in. Defaults to `us/las`.
    #[ortho_config(default = "us/las".to_owned())]
    pub region: String,
    /// Image name or alias the server boots from.
    #[ortho_config(default = String::new())]
    pub image: String,
    /// Boot volume storage type. Defaults to `HDD`.
    #[ortho_config(default = "HDD".to_owned())]
    pub disk_type: String,
    /// Boot volume size in gigabytes.
    #[ortho_config(default = 50)]
    pub disk_size: u32,
    /// CPU core count.
    #[ortho_config(default = 4)]
    pub cores: u32,
    /// Memory in megabytes.
    #[ortho_config(default = 2048)]
    pub ram: u32,
    /// Name of the resulting snapshot and of every resource created for it.
    /// A `snapwright-<uuid>` name is generated when empty.
    #[ortho_config(default = String::new())]
    pub snapshot_name: String,
    /// Public key injected into the image.
    pub ssh_public_key: Option<String>,
    /// File holding the public key, used when no inline key is set.
    pub ssh_public_key_path: Option<String>,
    /// Initial image password, also usable for SSH.
    pub ssh_password: Option<String>,
    /// Remote login user.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// SSH client binary.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Private key passed to the SSH client.
    pub ssh_identity_file: Option<String>,
    /// Remote SSH port.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Seconds to wait for the SSH port to open.
    #[ortho_config(default = 300)]
    pub ssh_timeout_secs: u64,
    /// Replaces every poll retry budget when positive.
    #[ortho_config(default = 0)]
    pub retries: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add `{}` to snapwright.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value
        .map(String::as_str)
        .filter(|text| !text.trim().is_empty())
}

impl BuilderConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    fn require_positive(value: u32, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: set {} or `{}` in snapwright.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("snapwright")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::InvalidValue`] when a size is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials()?;
        Self::require_field(
            &self.image,
            &FieldMetadata::new("image name or alias", "IONOS_IMAGE", "image"),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("region", "IONOS_REGION", "region"),
        )?;
        Self::require_field(
            &self.disk_type,
            &FieldMetadata::new("disk type", "IONOS_DISK_TYPE", "disk_type"),
        )?;
        Self::require_positive(
            self.disk_size,
            &FieldMetadata::new("disk size", "IONOS_DISK_SIZE", "disk_size"),
        )?;
        Self::require_positive(
            self.cores,
            &FieldMetadata::new("core count", "IONOS_CORES", "cores"),
        )?;
        Self::require_positive(self.ram, &FieldMetadata::new("memory", "IONOS_RAM", "ram"))?;
        if non_empty(self.ssh_public_key.as_ref()).is_none()
            && non_empty(self.ssh_public_key_path.as_ref()).is_none()
        {
            return Err(FieldMetadata::new(
                "SSH public key",
                "IONOS_SSH_PUBLIC_KEY or IONOS_SSH_PUBLIC_KEY_PATH",
                "ssh_public_key",
            )
            .missing());
        }
        Ok(())
    }

    /// Returns the API credentials. A token wins over user name and password.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither a token nor a
    /// complete user name and password pair is configured.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if let Some(token) = non_empty(self.token.as_ref()) {
            return Ok(Credentials::Token(token.to_owned()));
        }
        match (
            non_empty(self.username.as_ref()),
            non_empty(self.password.as_ref()),
        ) {
            (Some(username), Some(password)) => Ok(Credentials::Basic {
                username: username.to_owned(),
                password: password.to_owned(),
            }),
            _ => Err(FieldMetadata::new(
                "API credentials",
                "IONOS_TOKEN or IONOS_USERNAME and IONOS_PASSWORD",
                "token",
            )
            .missing()),
        }
    }

    /// Builds the server description, reading the public key file when no
    /// inline key is set and generating a snapshot name when none is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the key file cannot
    /// be read.
    pub fn server_spec(&self) -> Result<ServerSpec, ConfigError> {
        self.validate()?;
        let name = if self.snapshot_name.trim().is_empty() {
            format!("snapwright-{}", Uuid::new_v4())
        } else {
            self.snapshot_name.trim().to_owned()
        };
        Ok(ServerSpec {
            name,
            region: self.region.clone(),
            image: self.image.clone(),
            disk_type: self.disk_type.clone(),
            disk_size: self.disk_size,
            cores: self.cores,
            ram: self.ram,
            ssh_public_key: self.public_key()?,
            image_password: non_empty(self.ssh_password.as_ref()).map(str::to_owned),
        })
    }

    fn public_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = non_empty(self.ssh_public_key.as_ref()) {
            return Ok(key.trim().to_owned());
        }
        let path = non_empty(self.ssh_public_key_path.as_ref()).ok_or_else(|| {
            FieldMetadata::new(
                "SSH public key",
                "IONOS_SSH_PUBLIC_KEY_PATH",
                "ssh_public_key_path",
            )
            .missing()
        })?;
        let expanded = expand_tilde(path);
        let content = read_to_string_ambient(&expanded).map_err(|message| ConfigError::KeyFile {
            path: expanded.clone(),
            message,
        })?;
        let key = content.trim();
        if key.is_empty() {
            return Err(ConfigError::KeyFile {
                path: expanded,
                message: String::from("file is empty"),
            });
        }
        Ok(key.to_owned())
    }

    /// Returns the SSH client settings.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            identity_file: non_empty(self.ssh_identity_file.as_ref()).map(str::to_owned),
            ..SshSettings::default()
        }
    }

    /// Time allowed for the SSH port to open.
    #[must_use]
    pub const fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    /// Poll policy for resource-creation requests.
    #[must_use]
    pub const fn resource_policy(&self) -> WaitPolicy {
        WaitPolicy::resource_creation().with_retry_override(self.retries)
    }

    /// Poll policy for the snapshot request and snapshot availability.
    #[must_use]
    pub const fn snapshot_policy(&self) -> WaitPolicy {
        WaitPolicy::snapshot().with_retry_override(self.retries)
    }
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);
    let parent = path_buf
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path_buf
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path_buf}"))?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Raised when the public key file cannot be read.
    #[error("failed to read SSH public key from {path}: {message}")]
    KeyFile {
        /// Path that was read.
        path: String,
        /// I/O error message.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
