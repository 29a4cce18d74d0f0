//! Image availability on the remote host.
//!
//! An image is looked up remotely first. When absent, a cached archive from an
//! earlier export is loaded if one exists; only without one is the image built
//! and exported. Loading and transfer are retried, build and export are not.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder::ImageBuilder;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::host::HostTarget;
use crate::models::image::{ArtifactTar, ImageRef};
use crate::remote::RemoteExecutor;
use crate::retry::{retry, retry_transient, RetryPolicy};
use crate::utils::shell_quote;

/// How an image became available on the host.
///
/// `ensure` only returns a resolution once the image is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    AlreadyPresent,
    LoadedFromCache,
    BuiltAndLoaded,
}

/// Timeouts of the resolver's remote and build steps
#[derive(Debug, Clone)]
pub struct ResolverTimeouts {
    pub list: Duration,
    pub transfer: Duration,
    pub load: Duration,
}

/// Makes image tags available on remote hosts
pub struct ImageResolver {
    builder: Arc<dyn ImageBuilder>,
    executor: Arc<dyn RemoteExecutor>,
    artifacts: Dir,
    contexts_root: PathBuf,
    remote_dir: String,
    retry: RetryPolicy,
    timeouts: ResolverTimeouts,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ImageResolver {
    pub fn new(
        builder: Arc<dyn ImageBuilder>,
        executor: Arc<dyn RemoteExecutor>,
        artifacts: Dir,
        contexts_root: impl Into<PathBuf>,
        remote_dir: impl Into<String>,
        retry: RetryPolicy,
        timeouts: ResolverTimeouts,
    ) -> Self {
        Self {
            builder,
            executor,
            artifacts,
            contexts_root: contexts_root.into(),
            remote_dir: remote_dir.into(),
            retry,
            timeouts,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Make `image` available on `host`.
    ///
    /// Concurrent calls for the same tag are serialized so a missing image is
    /// built at most once.
    pub async fn ensure(
        &self,
        host: &HostTarget,
        image: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution, DeployError> {
        let lock = self.lock_for(&image.tag).await;
        let _guard = lock.lock().await;

        match self.remote_has(host, &image.tag, cancel).await {
            Ok(true) => {
                info!("Image {} already present on {}", image.tag, host);
                return Ok(Resolution::AlreadyPresent);
            }
            Ok(false) => debug!("Image {} not found on {}", image.tag, host),
            Err(e @ DeployError::Cancelled(_)) => return Err(e),
            Err(e) => warn!(
                "Could not list images on {}, checking local artifacts: {}",
                host, e
            ),
        }

        let cached = self.artifacts.file(&image.artifact_file_name());
        let (artifact, resolution) = if cached.exists().await {
            info!("Reusing exported artifact {}", cached.path().display());
            let artifact = ArtifactTar {
                path: cached.path().to_path_buf(),
                image: image.clone(),
            };
            (artifact, Resolution::LoadedFromCache)
        } else {
            let artifact = self.build_and_export(image, cached.path().to_path_buf(), cancel).await?;
            (artifact, Resolution::BuiltAndLoaded)
        };

        match self.transfer_and_load(host, &artifact, cancel).await {
            Ok(()) => {
                artifact.discard().await;
                info!("Image {} loaded on {}", image.tag, host);
                Ok(resolution)
            }
            Err(e @ DeployError::Cancelled(_)) => {
                artifact.discard().await;
                Err(e)
            }
            Err(e) => {
                warn!(
                    "Keeping {} for the next attempt after load failure",
                    artifact.path.display()
                );
                Err(e)
            }
        }
    }

    async fn lock_for(&self, tag: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(tag.to_string()).or_default().clone()
    }

    async fn remote_has(
        &self,
        host: &HostTarget,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, DeployError> {
        let wanted = normalize_tag(tag);
        let images = retry_transient(&self.retry, cancel, "list images", || {
            self.builder.list_images(Some(host), cancel)
        })
        .await?;

        Ok(images.iter().any(|listed| normalize_tag(listed) == wanted))
    }

    fn context_dir(&self, image: &ImageRef) -> Result<PathBuf, DeployError> {
        let Some(context) = image.build_context.as_deref() else {
            return Err(DeployError::BuildError(format!(
                "{} is not on the host and has no build context",
                image.tag
            )));
        };
        let path = PathBuf::from(context);
        Ok(if path.is_absolute() {
            path
        } else {
            self.contexts_root.join(path)
        })
    }

    async fn build_and_export(
        &self,
        image: &ImageRef,
        output: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<ArtifactTar, DeployError> {
        let context = self.context_dir(image)?;
        if tokio::fs::metadata(&context).await.map(|m| !m.is_dir()).unwrap_or(true) {
            return Err(DeployError::BuildError(format!(
                "build context {} of {} is not a directory",
                context.display(),
                image.tag
            )));
        }

        self.builder
            .build(
                &context,
                image.dockerfile.as_deref(),
                &image.tag,
                &image.build_args,
                cancel,
            )
            .await?;

        let path = self.builder.export(&image.tag, &output, cancel).await?;
        Ok(ArtifactTar {
            path,
            image: image.clone(),
        })
    }

    async fn transfer_and_load(
        &self,
        host: &HostTarget,
        artifact: &ArtifactTar,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let images_dir = format!("{}/images", self.remote_dir.trim_end_matches('/'));
        let remote_path = format!("{}/{}", images_dir, artifact.file_name());

        info!("Transferring {} to {}", artifact.file_name(), host);
        retry_transient(&self.retry, cancel, "transfer image", || {
            self.executor.copy(
                host,
                &artifact.path,
                &images_dir,
                self.timeouts.transfer,
                cancel,
            )
        })
        .await?;

        // A busy daemon fails the load with a plain non-zero exit
        let load = format!("docker load -i {}", shell_quote(&remote_path));
        retry(
            &self.retry,
            cancel,
            "load image",
            |e| e.is_transient() || matches!(e, DeployError::CommandFailed { .. }),
            || self.executor.run(host, &load, self.timeouts.load, cancel),
        )
        .await?;

        let cleanup = format!("rm -f {}", shell_quote(&remote_path));
        if let Err(e) = self
            .executor
            .run(host, &cleanup, self.timeouts.list, cancel)
            .await
        {
            warn!("Failed to remove {} on {}: {}", remote_path, host, e);
        }

        Ok(())
    }
}

/// `name` and `name:latest` are the same image
fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    let name_start = tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    if tag[name_start..].contains(':') {
        tag.to_string()
    } else {
        format!("{}:latest", tag)
    }
}
