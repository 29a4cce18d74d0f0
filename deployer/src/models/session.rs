//! Session records and their lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Requested,
    Starting,
    Running,
    Failed,
    /// Any status this deployer does not know how to handle
    Unexpected(String),
}

impl SessionStatus {
    /// Map a control-plane `operational_status` value
    pub fn from_operational(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "requested" => SessionStatus::Requested,
            "starting" | "provisioning" | "assigned" | "pulling" => SessionStatus::Starting,
            "running" => SessionStatus::Running,
            "failed" | "error" | "stopped" | "deleted" => SessionStatus::Failed,
            _ => SessionStatus::Unexpected(status.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Running | SessionStatus::Failed | SessionStatus::Unexpected(_)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Requested => write!(f, "requested"),
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Unexpected(raw) => write!(f, "unexpected({})", raw),
        }
    }
}

/// One provisioned session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub image_id: String,
    pub status: SessionStatus,
    /// Backing container, known once running
    pub container_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}
