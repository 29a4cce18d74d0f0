//! Container images and exported image artifacts

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::DeployError;
use crate::utils::{sanitize_tag, sha256_hash};

/// A container image, optionally buildable from a named context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// `registry/name:version`
    pub tag: String,

    /// Directory name under the build contexts root, or an absolute path
    #[serde(default)]
    pub build_context: Option<String>,

    /// Dockerfile path relative to the build context
    #[serde(default)]
    pub dockerfile: Option<String>,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

impl ImageRef {
    /// Create an image reference, rejecting empty tags
    pub fn new(tag: impl Into<String>) -> Result<Self, DeployError> {
        let tag = tag.into().trim().to_string();
        if tag.is_empty() {
            return Err(DeployError::ConfigError("image tag must not be empty".to_string()));
        }
        Ok(Self {
            tag,
            build_context: None,
            dockerfile: None,
            build_args: BTreeMap::new(),
        })
    }

    pub fn with_build_context(mut self, context: impl Into<String>, dockerfile: Option<String>) -> Self {
        self.build_context = Some(context.into());
        self.dockerfile = dockerfile;
        self
    }

    /// Deterministic artifact file name for this tag.
    ///
    /// The sanitized tag keeps the name readable, the hash suffix keeps tags
    /// that sanitize identically apart.
    pub fn artifact_file_name(&self) -> String {
        let digest = sha256_hash(self.tag.as_bytes());
        format!("{}-{}.tar", sanitize_tag(&self.tag), &digest[..12])
    }
}

/// An exported image archive on the local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTar {
    pub path: PathBuf,
    pub image: ImageRef,
}

impl ArtifactTar {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.image.artifact_file_name())
    }

    /// Remove the archive, logging instead of failing
    pub async fn discard(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove artifact {}: {}", self.path.display(), e),
        }
    }
}
