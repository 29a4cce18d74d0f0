//! OpenSSH-backed remote executor.
//!
//! Every command and transfer is its own `ssh`/`scp` invocation multiplexed
//! over one control-master connection per host. Operations hold the teardown
//! lock shared; [`SshExecutor::close`] takes it exclusively so the master is
//! never torn down under an in-flight operation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::models::host::{Credential, HostTarget};
use crate::process::{run_command, CommandOutput};
use crate::remote::RemoteExecutor;
use crate::utils::shell_quote;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Remote executor shelling out to `ssh` and `scp`
pub struct SshExecutor {
    control_dir: PathBuf,
    control_persist: Duration,
    teardown: RwLock<()>,
}

impl SshExecutor {
    /// Create an executor keeping its control sockets in `control_dir`
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            control_persist: Duration::from_secs(120),
            teardown: RwLock::new(()),
        }
    }

    /// Options shared by `ssh` and `scp`
    fn common_options(&self, host: &HostTarget) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", host.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.control_persist.as_secs()),
        ];

        match &host.known_hosts {
            Some(known_hosts) => {
                options.push("-o".to_string());
                options.push(format!("UserKnownHostsFile={}", known_hosts.display()));
                options.push("-o".to_string());
                options.push("StrictHostKeyChecking=yes".to_string());
            }
            None => {
                options.push("-o".to_string());
                options.push("StrictHostKeyChecking=accept-new".to_string());
            }
        }

        match &host.credential {
            Credential::IdentityFile(path) => {
                options.push("-o".to_string());
                options.push("BatchMode=yes".to_string());
                options.push("-o".to_string());
                options.push("IdentitiesOnly=yes".to_string());
                options.push("-i".to_string());
                options.push(path.display().to_string());
            }
            Credential::Agent => {
                options.push("-o".to_string());
                options.push("BatchMode=yes".to_string());
            }
            Credential::Password(_) => {
                options.push("-o".to_string());
                options.push("PubkeyAuthentication=no".to_string());
            }
        }

        options
    }

    fn control_path(&self) -> PathBuf {
        self.control_dir.join("%C")
    }

    /// `ssh`/`scp`, wrapped in `sshpass` for password credentials
    fn program(&self, host: &HostTarget, tool: &str) -> Command {
        match &host.credential {
            Credential::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(tool);
                cmd.env("SSHPASS", password.expose_secret());
                cmd
            }
            _ => Command::new(tool),
        }
    }

    fn ssh_command(&self, host: &HostTarget, remote_command: &str) -> Command {
        let mut cmd = self.program(host, "ssh");
        cmd.args(self.common_options(host))
            .arg("-p")
            .arg(host.port.to_string())
            .arg(host.destination())
            .arg("--")
            .arg(remote_command);
        cmd
    }

    fn classify(host: &HostTarget, label: &str, out: CommandOutput) -> Result<String, DeployError> {
        if out.code == Some(SSH_CONNECTION_FAILURE) {
            return Err(DeployError::ConnectionError(format!(
                "{}: {}",
                host,
                out.output.trim()
            )));
        }
        out.into_result(label)
    }

    /// Tear down the control-master connection to `host`.
    ///
    /// Waits for every in-flight operation to finish first.
    pub async fn close(&self, host: &HostTarget) {
        let _guard = self.teardown.write().await;

        let mut cmd = Command::new("ssh");
        cmd.arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .arg("-p")
            .arg(host.port.to_string())
            .arg(host.destination());

        let label = format!("ssh -O exit {}", host);
        match run_command(cmd, &label, Duration::from_secs(10), &CancellationToken::new()).await {
            Ok(out) if out.success() => debug!("Closed ssh connection to {}", host),
            // No master running is the common case after ControlPersist expired
            Ok(out) => debug!("No ssh master to close for {}: {}", host, out.output.trim()),
            Err(e) => warn!("Failed to close ssh connection to {}: {}", host, e),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        host: &HostTarget,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let _guard = self.teardown.read().await;

        let label = format!("ssh {}: {}", host, command);
        let out = run_command(self.ssh_command(host, command), &label, timeout, cancel).await?;
        Self::classify(host, &label, out)
    }

    async fn copy(
        &self,
        host: &HostTarget,
        local_path: &Path,
        remote_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let mkdir = format!("mkdir -p {}", shell_quote(remote_dir));
        self.run(host, &mkdir, timeout, cancel).await?;

        let _guard = self.teardown.read().await;

        let target = format!("{}:{}/", host.destination(), remote_dir.trim_end_matches('/'));
        let mut cmd = self.program(host, "scp");
        cmd.args(self.common_options(host))
            .arg("-P")
            .arg(host.port.to_string())
            .arg(local_path)
            .arg(&target);

        let label = format!("scp {} {}", local_path.display(), target);
        let out = run_command(cmd, &label, timeout, cancel).await?;
        // scp reports connection failures as a plain exit 1, so only ssh's 255 is reclassified
        Self::classify(host, &label, out).map(|_| ())
    }
}
