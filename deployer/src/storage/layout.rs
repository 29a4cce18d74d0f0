//! Local working directory layout

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// Local working directories of the deployer
#[derive(Debug, Clone)]
pub struct WorkLayout {
    /// Base directory for all local state
    pub base_dir: PathBuf,
}

impl WorkLayout {
    /// Create a new layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Exported image archives, keyed by sanitized tag
    pub fn artifacts_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("artifacts"))
    }

    /// Rendered stack documents
    pub fn stacks_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("stacks"))
    }

    /// ssh control sockets
    pub fn control_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("ssh"))
    }

    /// Create every directory of the layout
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.artifacts_dir().create().await?;
        self.stacks_dir().create().await?;
        self.control_dir().create().await?;
        Ok(())
    }
}
