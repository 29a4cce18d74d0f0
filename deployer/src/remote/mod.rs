//! Remote command execution and file transfer

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::DeployError;
use crate::models::host::HostTarget;

pub mod ssh;

pub use ssh::SshExecutor;

/// Runs shell commands on, and copies files to, a remote host.
///
/// Authentication and host-key verification are the implementation's
/// concern; callers only hand over the [`HostTarget`].
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` through the remote shell and return its combined output.
    ///
    /// A non-zero exit is `CommandFailed`, an unreachable host is
    /// `ConnectionError`, an expired `timeout` is `Timeout`.
    async fn run(
        &self,
        host: &HostTarget,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError>;

    /// Copy a local file into `remote_dir`, creating the directory if needed
    async fn copy(
        &self,
        host: &HostTarget,
        local_path: &Path,
        remote_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;
}
