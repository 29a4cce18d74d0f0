//! API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Image registered with the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_id: String,
    /// Docker tag of the image (`registry/name:version`)
    pub name: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `get_images` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetImagesResponse {
    #[serde(default)]
    pub images: Vec<ImageInfo>,
}

/// User selector used by `get_user`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSelector {
    pub username: String,
}

/// `get_user` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserRequest {
    pub target_user: UserSelector,
}

/// New user definition sent with `create_user`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// `create_user` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub target_user: NewUser,
}

/// User as returned by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
}

/// `get_user` / `create_user` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Host path mounted into a session container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    /// Mount point inside the container
    pub bind: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default)]
    pub required: bool,
}

fn default_mode() -> String {
    "rw".to_string()
}

/// `request_kasm` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub user_id: String,
    pub image_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volume_mappings: BTreeMap<String, VolumeMapping>,
}

/// `request_kasm` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub kasm_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub kasm_url: Option<String>,
}

/// `get_kasm_status` / `destroy_kasm` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSelector {
    pub kasm_id: String,
    pub user_id: String,
}

/// Session details embedded in a status response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDetails {
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// `get_kasm_status` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    #[serde(default)]
    pub operational_status: String,
    #[serde(default)]
    pub operational_message: Option<String>,
    #[serde(default)]
    pub kasm: Option<SessionDetails>,
}

/// Error body returned with a successful HTTP status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_message: String,
}
