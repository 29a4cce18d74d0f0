//! Finite State Machine for session provisioning

use crate::models::session::SessionStatus;

/// Session event, derived from one status observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Control plane reports the session as still coming up
    Starting,

    /// Session is running in the given container
    Ready(String),

    /// Session failed to start
    Failed(String),

    /// Status this deployer does not handle
    Unknown(String),
}

impl SessionEvent {
    /// Event for an observed status; `None` for a status that carries no news
    pub fn from_status(status: &SessionStatus, container_id: Option<&str>) -> Option<Self> {
        match status {
            SessionStatus::Requested => None,
            SessionStatus::Starting => Some(SessionEvent::Starting),
            SessionStatus::Running => match container_id.filter(|id| !id.is_empty()) {
                Some(id) => Some(SessionEvent::Ready(id.to_string())),
                // Running without a container yet; treat as still starting
                None => Some(SessionEvent::Starting),
            },
            SessionStatus::Failed => Some(SessionEvent::Failed("session failed".to_string())),
            SessionStatus::Unexpected(raw) => Some(SessionEvent::Unknown(raw.clone())),
        }
    }
}

/// Session FSM
#[derive(Debug, Clone)]
pub struct SessionFsm {
    state: SessionStatus,
    container_id: Option<String>,
    error: Option<String>,
}

impl SessionFsm {
    /// Create a new FSM in requested state
    pub fn new() -> Self {
        Self {
            state: SessionStatus::Requested,
            container_id: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &SessionStatus {
        &self.state
    }

    /// Backing container, set once running
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: SessionEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (SessionStatus::Requested | SessionStatus::Starting, SessionEvent::Starting) => {
                SessionStatus::Starting
            }
            (SessionStatus::Requested | SessionStatus::Starting, SessionEvent::Ready(id)) => {
                self.container_id = Some(id.clone());
                SessionStatus::Running
            }
            (SessionStatus::Requested | SessionStatus::Starting, SessionEvent::Failed(err)) => {
                self.error = Some(err.clone());
                SessionStatus::Failed
            }
            (SessionStatus::Requested | SessionStatus::Starting, SessionEvent::Unknown(raw)) => {
                SessionStatus::Unexpected(raw.clone())
            }

            // Terminal states accept nothing
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}
