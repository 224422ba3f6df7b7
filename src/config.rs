//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::remote::{HostKeyPolicy, SessionTarget};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Directory on the control host that receives the bucket contents.
pub const DEFAULT_TARGET_DIR: &str = "/tmp";

/// Suffix identifying credential objects, which never trigger a pull.
pub const DEFAULT_CREDENTIAL_SUFFIX: &str = ".pem";

/// Settings for the pull trigger, read from `PULLHOOK_*` environment
/// variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "PULLHOOK")]
pub struct PullConfig {
    /// Address of the control host that performs the pull.
    pub control_host: String,
    /// Name of the private-key object stored alongside the uploads.
    pub key_object: String,
    /// Account used to authenticate on the control host.
    pub username: String,
    /// Region of the bucket. Defaults to `us-east-1`.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub region: String,
    /// SSH port on the control host.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Upper bound on dialling and negotiating the SSH session.
    #[ortho_config(default = 15)]
    pub connect_timeout_secs: u64,
    /// Skip host identity verification entirely. Off by default; enabling it
    /// trusts whichever host answers on the configured address.
    #[ortho_config(default = false)]
    pub accept_any_host_key: bool,
    /// Pinned SHA-256 fingerprint of the control host key, in the
    /// `SHA256:<base64>` form printed by `ssh-keygen -lf`.
    pub host_key_fingerprint: Option<String>,
    /// Directory on the control host that receives the synchronised objects.
    #[ortho_config(default = DEFAULT_TARGET_DIR.to_owned())]
    pub target_dir: String,
    /// Pattern excluded from the synchronisation.
    #[ortho_config(default = "*.pem".to_owned())]
    pub exclude_pattern: String,
    /// Object-key suffix that marks credential uploads to be skipped.
    #[ortho_config(default = DEFAULT_CREDENTIAL_SUFFIX.to_owned())]
    pub credential_suffix: String,
    /// Seconds the control host waits after syncing before the command ends.
    #[ortho_config(default = 5)]
    pub settle_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str) -> Self {
        Self {
            description,
            env_var,
        }
    }
}

impl PullConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "{}: set {}",
                metadata.description, metadata.env_var
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails, which includes a
    /// required value being absent from every source.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("pullhook")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank,
    /// and [`ConfigError::HostKey`] when host verification is enabled without
    /// a pinned fingerprint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.control_host,
            &FieldMetadata::new("control host address", "PULLHOOK_CONTROL_HOST"),
        )?;
        Self::require_field(
            &self.key_object,
            &FieldMetadata::new("private key object name", "PULLHOOK_KEY_OBJECT"),
        )?;
        Self::require_field(
            &self.username,
            &FieldMetadata::new("SSH username", "PULLHOOK_USERNAME"),
        )?;
        Self::require_field(&self.region, &FieldMetadata::new("region", "PULLHOOK_REGION"))?;
        Self::require_field(
            &self.target_dir,
            &FieldMetadata::new("target directory", "PULLHOOK_TARGET_DIR"),
        )?;
        Self::require_field(
            &self.credential_suffix,
            &FieldMetadata::new("credential suffix", "PULLHOOK_CREDENTIAL_SUFFIX"),
        )?;
        if self.ssh_port == 0 {
            return Err(ConfigError::MissingField(String::from(
                "SSH port: set PULLHOOK_SSH_PORT to a non-zero port",
            )));
        }
        self.host_key_policy().map(|_| ())
    }

    /// Builds the host-key policy from the verification settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HostKey`] when verification is enabled but no
    /// fingerprint is pinned.
    pub fn host_key_policy(&self) -> Result<HostKeyPolicy, ConfigError> {
        if self.accept_any_host_key {
            return Ok(HostKeyPolicy::AcceptAny);
        }
        match self.host_key_fingerprint.as_deref().map(str::trim) {
            Some(fingerprint) if !fingerprint.is_empty() => Ok(HostKeyPolicy::Pinned {
                fingerprint: fingerprint.to_owned(),
            }),
            _ => Err(ConfigError::HostKey),
        }
    }

    /// Builds the connection parameters for the control host.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HostKey`] under the same conditions as
    /// [`PullConfig::host_key_policy`].
    pub fn session_target(&self) -> Result<SessionTarget, ConfigError> {
        Ok(SessionTarget {
            host: self.control_host.trim().to_owned(),
            port: self.ssh_port,
            username: self.username.trim().to_owned(),
            connect_timeout: self.connect_timeout(),
            host_key_policy: self.host_key_policy()?,
        })
    }

    /// Returns the dial timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the post-sync settle delay as a [`Duration`].
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Returns `true` when `object_key` names a credential upload.
    #[must_use]
    pub fn is_credential_key(&self, object_key: &str) -> bool {
        object_key.ends_with(self.credential_suffix.as_str())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates host verification is enabled without a pinned key.
    #[error(
        "host key verification needs PULLHOOK_HOST_KEY_FINGERPRINT; \
         set PULLHOOK_ACCEPT_ANY_HOST_KEY=true to skip verification"
    )]
    HostKey,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
