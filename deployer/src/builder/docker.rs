//! `docker` CLI image builder

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::builder::{parse_image_list, ImageBuilder};
use crate::errors::DeployError;
use crate::models::host::HostTarget;
use crate::process::run_command;
use crate::remote::RemoteExecutor;

const LIST_FORMAT: &str = "{{.Repository}}:{{.Tag}}";

/// Image builder driving the local `docker` binary.
///
/// Remote listings go through the executor since the remote daemon is only
/// reachable over ssh.
pub struct DockerCli {
    executor: Arc<dyn RemoteExecutor>,
    build_timeout: Duration,
    export_timeout: Duration,
    list_timeout: Duration,
}

impl DockerCli {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        build_timeout: Duration,
        export_timeout: Duration,
        list_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            build_timeout,
            export_timeout,
            list_timeout,
        }
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(
        &self,
        context_dir: &Path,
        dockerfile: Option<&str>,
        tag: &str,
        build_args: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        info!("Building image {} from {}", tag, context_dir.display());

        let mut cmd = Command::new("docker");
        cmd.arg("build").arg("-t").arg(tag);
        if let Some(dockerfile) = dockerfile {
            cmd.arg("-f").arg(context_dir.join(dockerfile));
        }
        for (key, value) in build_args {
            cmd.arg("--build-arg").arg(format!("{}={}", key, value));
        }
        cmd.arg(context_dir);

        let label = format!("docker build -t {}", tag);
        let out = run_command(cmd, &label, self.build_timeout, cancel).await?;
        if !out.success() {
            return Err(DeployError::BuildError(format!(
                "{} exited with {:?}: {}",
                tag,
                out.code,
                tail(&out.output)
            )));
        }
        Ok(())
    }

    async fn export(
        &self,
        tag: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DeployError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Saving to a partial name keeps an interrupted export from looking like a cached artifact
        let partial = output.with_extension("tar.partial");
        let mut cmd = Command::new("docker");
        cmd.arg("save").arg("-o").arg(&partial).arg(tag);

        let label = format!("docker save {}", tag);
        let out = match run_command(cmd, &label, self.export_timeout, cancel).await {
            Ok(out) => out,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        if !out.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DeployError::ExportError(format!(
                "{} exited with {:?}: {}",
                tag,
                out.code,
                tail(&out.output)
            )));
        }

        tokio::fs::rename(&partial, output).await?;
        debug!("Exported {} to {}", tag, output.display());
        Ok(output.to_path_buf())
    }

    async fn list_images(
        &self,
        host: Option<&HostTarget>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DeployError> {
        let output = match host {
            Some(host) => {
                let command = format!("docker images --format '{}'", LIST_FORMAT);
                self.executor
                    .run(host, &command, self.list_timeout, cancel)
                    .await?
            }
            None => {
                let mut cmd = Command::new("docker");
                cmd.arg("images").arg("--format").arg(LIST_FORMAT);
                run_command(cmd, "docker images", self.list_timeout, cancel)
                    .await?
                    .into_result("docker images")?
            }
        };

        Ok(parse_image_list(&output))
    }
}

/// Last lines of build output, where docker puts the actual failure
fn tail(output: &str) -> String {
    let lines: Vec<&str> = output.trim().lines().collect();
    let start = lines.len().saturating_sub(10);
    lines[start..].join("\n")
}
