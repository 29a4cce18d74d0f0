//! Container image build, export and listing

pub mod docker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::DeployError;
use crate::models::host::HostTarget;

pub use docker::DockerCli;

/// Builds, exports and lists container images
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `context_dir` (using `dockerfile` relative to it) into `tag`
    async fn build(
        &self,
        context_dir: &Path,
        dockerfile: Option<&str>,
        tag: &str,
        build_args: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;

    /// Save image `tag` into an archive at `output`, returning its path
    async fn export(
        &self,
        tag: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DeployError>;

    /// `repository:tag` of every image on `host`, or locally when `None`
    async fn list_images(
        &self,
        host: Option<&HostTarget>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DeployError>;
}

/// Parse `docker images --format '{{.Repository}}:{{.Tag}}'` output
pub fn parse_image_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("<none>"))
        .map(str::to_string)
        .collect()
}
