//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::images::ResolverTimeouts;
use crate::deploy::session::PollBudget;
use crate::deploy::stack::StackTimeouts;
use crate::models::host::HostTarget;
use crate::retry::RetryPolicy;
use crate::storage::layout::WorkLayout;
use crate::storage::settings::{Settings, TimeoutSettings};

/// Everything a command needs, derived once from the settings file
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub host: HostTarget,

    pub control_plane: ControlPlaneOptions,

    /// Local working directories
    pub layout: WorkLayout,

    /// Root of named build contexts
    pub build_contexts_dir: PathBuf,

    pub remote_dir: String,

    pub network: String,

    pub concurrency: usize,

    pub retry: RetryPolicy,

    pub poll: PollBudget,

    pub timeouts: Timeouts,
}

/// Control-plane connection options
#[derive(Debug, Clone)]
pub struct ControlPlaneOptions {
    pub base_url: String,
    pub api_key: String,
    pub api_key_secret: SecretString,
    pub timeout: Duration,
}

/// Per-call timeouts
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub command: Duration,
    pub status: Duration,
    pub compose_up: Duration,
    pub transfer: Duration,
    pub load: Duration,
    pub build: Duration,
}

impl From<&TimeoutSettings> for Timeouts {
    fn from(settings: &TimeoutSettings) -> Self {
        Self {
            command: Duration::from_secs(settings.command_secs),
            status: Duration::from_secs(settings.status_secs),
            compose_up: Duration::from_secs(settings.compose_up_secs),
            transfer: Duration::from_secs(settings.transfer_secs),
            load: Duration::from_secs(settings.load_secs),
            build: Duration::from_secs(settings.build_secs),
        }
    }
}

impl Timeouts {
    pub fn resolver(&self) -> ResolverTimeouts {
        ResolverTimeouts {
            list: self.command,
            transfer: self.transfer,
            load: self.load,
        }
    }

    pub fn stack(&self) -> StackTimeouts {
        StackTimeouts {
            command: self.command,
            transfer: self.transfer,
            compose_up: self.compose_up,
        }
    }
}

impl DeployOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.host.to_target(),
            control_plane: ControlPlaneOptions {
                base_url: settings.control_plane.base_url.clone(),
                api_key: settings.control_plane.api_key.clone(),
                api_key_secret: settings.control_plane.api_key_secret.clone(),
                timeout: Duration::from_secs(settings.control_plane.timeout_secs),
            },
            layout: WorkLayout::new(settings.work_dir.clone()),
            build_contexts_dir: settings.build_contexts_dir.clone(),
            remote_dir: settings.remote_dir.clone(),
            network: settings.network.clone(),
            concurrency: settings.concurrency,
            retry: settings.retry.clone(),
            poll: PollBudget {
                attempts: settings.poll.attempts,
                interval: Duration::from_secs(settings.poll.interval_secs),
            },
            timeouts: Timeouts::from(&settings.timeouts),
        }
    }
}
