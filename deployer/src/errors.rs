//! Error types for the deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("Declarative source error: {0}")]
    SourceError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Command `{command}` exited with {code:?}: {output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Control plane error: {0}")]
    ControlPlaneError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Deployment run failed: {0}")]
    RunFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether the failure is a transient infrastructure error worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            DeployError::Timeout(_) | DeployError::ConnectionError(_) => true,
            DeployError::HttpError(e) => !e.is_decode() && !e.is_builder(),
            DeployError::HttpStatus { status, .. } => *status != 404,
            _ => false,
        }
    }

    /// Whether the control plane reported the entity as absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DeployError::NotFound(_) | DeployError::HttpStatus { status: 404, .. }
        )
    }
}
