//! Users and workspaces declared in the source document

use std::collections::BTreeMap;

use controlplane_api::VolumeMapping;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::models::image::ImageRef;
use crate::utils::deserialize_secret_opt;

/// A named image configuration users can be assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Image tag sessions of this workspace run
    pub image: String,

    #[serde(default)]
    pub friendly_name: Option<String>,

    #[serde(default)]
    pub build_context: Option<String>,

    #[serde(default)]
    pub dockerfile: Option<String>,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

impl Workspace {
    pub fn image_ref(&self) -> Result<ImageRef, DeployError> {
        let mut image = ImageRef::new(self.image.clone())?;
        image.build_context = self.build_context.clone();
        image.dockerfile = self.dockerfile.clone();
        image.build_args = self.build_args.clone();
        Ok(image)
    }
}

/// Profile fields sent when a user is created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret_opt", skip_serializing)]
    pub password: Option<SecretString>,
}

/// A user entry as written in the source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,

    #[serde(flatten)]
    pub profile: UserProfile,

    /// Key into `workspaces`
    pub workspace: String,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Host path -> container mount
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeMapping>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub kasm_id: Option<String>,
}

/// The declarative source document: workspaces and the users assigned to them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclarativeSource {
    #[serde(default)]
    pub workspaces: BTreeMap<String, Workspace>,

    #[serde(default)]
    pub users: Vec<UserEntry>,
}

impl DeclarativeSource {
    /// Resolve every user against its workspace
    pub fn user_records(&self) -> Result<Vec<UserRecord>, DeployError> {
        let mut records = Vec::with_capacity(self.users.len());
        let mut seen = std::collections::BTreeSet::new();

        for (i, entry) in self.users.iter().enumerate() {
            if entry.username.trim().is_empty() {
                return Err(DeployError::SourceError(format!(
                    "users[{}].username: must not be empty",
                    i
                )));
            }
            if !seen.insert(entry.username.as_str()) {
                return Err(DeployError::SourceError(format!(
                    "users[{}].username: duplicate user '{}'",
                    i, entry.username
                )));
            }
            let workspace = self.workspaces.get(&entry.workspace).ok_or_else(|| {
                DeployError::SourceError(format!(
                    "users[{}].workspace: unknown workspace '{}'",
                    i, entry.workspace
                ))
            })?;
            let image = workspace.image_ref().map_err(|e| {
                DeployError::SourceError(format!("workspaces.{}.image: {}", entry.workspace, e))
            })?;

            records.push(UserRecord {
                username: entry.username.clone(),
                profile: entry.profile.clone(),
                workspace: entry.workspace.clone(),
                image,
                environment: entry.environment.clone(),
                volumes: entry.volumes.clone(),
                user_id: entry.user_id.clone().filter(|id| !id.is_empty()),
                session_id: entry.kasm_id.clone().filter(|id| !id.is_empty()),
            });
        }

        Ok(records)
    }
}

/// A user resolved against its workspace, ready for provisioning
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: String,
    pub profile: UserProfile,
    pub workspace: String,
    pub image: ImageRef,
    pub environment: BTreeMap<String, String>,
    pub volumes: BTreeMap<String, VolumeMapping>,
    /// Control-plane identifier, empty until provisioned
    pub user_id: Option<String>,
    /// Last session requested for this user
    pub session_id: Option<String>,
}

impl UserRecord {
    /// Minimal record, mostly useful for tests and ad-hoc runs
    pub fn new(username: impl Into<String>, image: ImageRef) -> Self {
        Self {
            username: username.into(),
            profile: UserProfile::default(),
            workspace: String::new(),
            image,
            environment: BTreeMap::new(),
            volumes: BTreeMap::new(),
            user_id: None,
            session_id: None,
        }
    }
}
