//! Docker Compose stack deployment on a remote host

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::compose;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::host::HostTarget;
use crate::models::stack::StackDefinition;
use crate::remote::RemoteExecutor;
use crate::retry::{retry_transient, RetryPolicy};
use crate::utils::shell_quote;

/// Timeouts of the deployer's remote steps
#[derive(Debug, Clone)]
pub struct StackTimeouts {
    pub command: Duration,
    pub transfer: Duration,
    /// Output capture window of `up`
    pub compose_up: Duration,
}

/// Writes stack documents to a host and brings them up
pub struct StackDeployer {
    executor: Arc<dyn RemoteExecutor>,
    stacks_dir: Dir,
    retry: RetryPolicy,
    timeouts: StackTimeouts,
}

impl StackDeployer {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        stacks_dir: Dir,
        retry: RetryPolicy,
        timeouts: StackTimeouts,
    ) -> Self {
        Self {
            executor,
            stacks_dir,
            retry,
            timeouts,
        }
    }

    /// Validate `stack`, copy it to `remote_dir` on `host` as `<name>.yml` and bring it up.
    ///
    /// A non-zero exit fails the deploy; nothing is rolled back. When the
    /// command is still running after the capture window, the stack is
    /// considered launched.
    pub async fn deploy(
        &self,
        host: &HostTarget,
        stack: &StackDefinition,
        name: &str,
        remote_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        info!("Deploying stack {} to {}", name, host);
        compose::validate(stack)?;

        let local = self.stacks_dir.file(&format!("{}.yml", name));
        local.write_string(&stack.to_yaml()?).await?;
        debug!("Wrote stack document {}", local.path().display());

        retry_transient(&self.retry, cancel, "transfer stack", || {
            self.executor
                .copy(host, local.path(), remote_dir, self.timeouts.transfer, cancel)
        })
        .await?;

        let remote_file = remote_stack_path(remote_dir, name);
        match self
            .compose(host, &remote_file, "up -d", self.timeouts.compose_up, cancel)
            .await
        {
            Ok(output) => {
                debug!("compose up output: {}", output.trim());
                info!("Stack {} is up on {}", name, host);
                Ok(())
            }
            Err(DeployError::Timeout(_)) => {
                warn!(
                    "compose up for {} still running after {:?}, treating the stack as launched",
                    name, self.timeouts.compose_up
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop and remove the stack previously deployed as `name`
    pub async fn down(
        &self,
        host: &HostTarget,
        name: &str,
        remote_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let remote_file = remote_stack_path(remote_dir, name);
        self.compose(host, &remote_file, "down", self.timeouts.command, cancel)
            .await?;
        info!("Stack {} is down on {}", name, host);
        Ok(())
    }

    /// Run a compose subcommand, falling back to the standalone `docker-compose`
    async fn compose(
        &self,
        host: &HostTarget,
        remote_file: &str,
        subcommand: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let file = shell_quote(remote_file);
        let command = format!("docker compose -f {} {}", file, subcommand);

        match self.executor.run(host, &command, timeout, cancel).await {
            Err(DeployError::CommandFailed { output, .. }) if compose_plugin_missing(&output) => {
                debug!("docker compose unavailable, trying docker-compose...");
                let command = format!("docker-compose -f {} {}", file, subcommand);
                self.executor.run(host, &command, timeout, cancel).await
            }
            result => result,
        }
    }
}

fn remote_stack_path(remote_dir: &str, name: &str) -> String {
    format!("{}/{}.yml", remote_dir.trim_end_matches('/'), name)
}

fn compose_plugin_missing(output: &str) -> bool {
    output.contains("'compose' is not a docker command") || output.contains("unknown command: docker compose")
}
