//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::host::{Credential, HostTarget};
use crate::retry::RetryPolicy;
use crate::utils::{deserialize_secret, deserialize_secret_opt};

/// Deployer settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Remote docker host
    pub host: HostSettings,

    /// Control-plane API
    pub control_plane: ControlPlaneSettings,

    /// Directory on the remote host receiving stacks and image archives
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    /// Docker network session containers are attached to
    #[serde(default = "default_network")]
    pub network: String,

    /// Local working directory (artifact cache, rendered stacks)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Root of named build contexts
    #[serde(default = "default_build_contexts_dir")]
    pub build_contexts_dir: PathBuf,

    /// Upper bound of concurrent per-user operations
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

fn default_remote_dir() -> String {
    "/opt/wsdeploy".to_string()
}

fn default_network() -> String {
    "kasm_default_network".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".wsdeploy")
}

fn default_build_contexts_dir() -> PathBuf {
    PathBuf::from("contexts")
}

fn default_concurrency() -> usize {
    4
}

impl Settings {
    /// Load and check a settings file
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        let settings: Settings = file.read_yaml().await.map_err(|e| {
            DeployError::ConfigError(format!("{}: {}", file.path().display(), e))
        })?;
        settings.check()?;
        Ok(settings)
    }

    /// Report every missing or invalid field at once
    pub fn check(&self) -> Result<(), DeployError> {
        let mut violations = Vec::new();

        if self.host.address.trim().is_empty() {
            violations.push("host.address: must not be empty".to_string());
        }
        if self.host.username.trim().is_empty() {
            violations.push("host.username: must not be empty".to_string());
        }
        if self.host.identity_file.is_some() && self.host.password.is_some() {
            violations.push("host: identity_file and password are mutually exclusive".to_string());
        }
        if let Err(e) = url::Url::parse(&self.control_plane.base_url) {
            violations.push(format!("control_plane.base_url: {}", e));
        }
        if self.control_plane.api_key.trim().is_empty() {
            violations.push("control_plane.api_key: must not be empty".to_string());
        }
        if self.remote_dir.trim().is_empty() {
            violations.push("remote_dir: must not be empty".to_string());
        }
        if self.network.trim().is_empty() {
            violations.push("network: must not be empty".to_string());
        }
        if self.concurrency == 0 {
            violations.push("concurrency: must be at least 1".to_string());
        }
        if self.retry.attempts == 0 {
            violations.push("retry.attempts: must be at least 1".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(DeployError::ValidationError(violations))
        }
    }
}

/// Remote host settings
#[derive(Debug, Clone, Deserialize)]
pub struct HostSettings {
    pub address: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    #[serde(default, deserialize_with = "deserialize_secret_opt")]
    pub password: Option<SecretString>,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl HostSettings {
    pub fn to_target(&self) -> HostTarget {
        let credential = match (&self.identity_file, &self.password) {
            (Some(path), _) => Credential::IdentityFile(path.clone()),
            (None, Some(password)) => Credential::Password(password.clone()),
            (None, None) => Credential::Agent,
        };

        HostTarget {
            address: self.address.clone(),
            port: self.port,
            username: self.username.clone(),
            credential,
            known_hosts: self.known_hosts.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Control-plane API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneSettings {
    /// Base URL, e.g. `https://kasm.example.com`
    pub base_url: String,

    pub api_key: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key_secret: SecretString,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    30
}

/// Session status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval_secs: 5,
        }
    }
}

/// Per-call timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub command_secs: u64,
    pub status_secs: u64,
    pub compose_up_secs: u64,
    pub transfer_secs: u64,
    pub load_secs: u64,
    pub build_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_secs: 60,
            status_secs: 15,
            compose_up_secs: 60,
            transfer_secs: 900,
            load_secs: 900,
            build_secs: 1800,
        }
    }
}
