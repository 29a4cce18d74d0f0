//! Session provisioning against the control plane

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use controlplane_api::{
    NewUser, SessionRequest, SessionSelector, SessionStatusResponse, VolumeMapping,
};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::fsm::{SessionEvent, SessionFsm};
use crate::errors::DeployError;
use crate::http::ControlPlane;
use crate::models::host::HostTarget;
use crate::models::session::{SessionRecord, SessionStatus};
use crate::models::user::UserRecord;
use crate::remote::RemoteExecutor;
use crate::retry::{retry_transient, RetryPolicy};
use crate::utils::shell_quote;

/// How long to wait for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

/// Last observed state of a polled session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: SessionStatus,
    /// Set only when the session is running
    pub container_id: Option<String>,
}

/// Provisions users and sessions and wires session containers into a network
pub struct SessionProvisioner {
    control_plane: Arc<dyn ControlPlane>,
    executor: Arc<dyn RemoteExecutor>,
    retry: RetryPolicy,
    command_timeout: Duration,
    status_timeout: Duration,
}

impl SessionProvisioner {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        executor: Arc<dyn RemoteExecutor>,
        retry: RetryPolicy,
        command_timeout: Duration,
        status_timeout: Duration,
    ) -> Self {
        Self {
            control_plane,
            executor,
            retry,
            command_timeout,
            status_timeout,
        }
    }

    /// Control-plane image id of the image tagged `tag`
    pub async fn resolve_image_id(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let images = self.control_plane.get_images(cancel).await?;
        images
            .into_iter()
            .find(|image| image.name == tag)
            .map(|image| image.image_id)
            .ok_or_else(|| {
                DeployError::NotFound(format!("no control-plane image registered for {}", tag))
            })
    }

    /// Look the user up by name, creating it when the control plane does not know it.
    ///
    /// Lookup and create are not atomic; a user created concurrently by someone
    /// else surfaces as a conflict from the create call.
    pub async fn ensure_user(
        &self,
        user: &UserRecord,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        if let Some(existing) = self.control_plane.get_user(&user.username, cancel).await? {
            debug!("User {} exists as {}", user.username, existing.user_id);
            return Ok(existing.user_id);
        }

        let password = match &user.profile.password {
            Some(password) => password.expose_secret().to_string(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let new_user = NewUser {
            username: user.username.clone(),
            first_name: user.profile.first_name.clone(),
            last_name: user.profile.last_name.clone(),
            organization: user.profile.organization.clone(),
            phone: user.profile.phone.clone(),
            password,
            locked: false,
            disabled: false,
        };

        let created = self.control_plane.create_user(new_user, cancel).await?;
        info!("Created user {} as {}", user.username, created.user_id);
        Ok(created.user_id)
    }

    /// Request a session of `image_id` for `user_id`
    pub async fn request_session(
        &self,
        user_id: &str,
        image_id: &str,
        environment: &BTreeMap<String, String>,
        volumes: &BTreeMap<String, VolumeMapping>,
        cancel: &CancellationToken,
    ) -> Result<SessionRecord, DeployError> {
        let request = SessionRequest {
            user_id: user_id.to_string(),
            image_id: image_id.to_string(),
            environment: environment.clone(),
            volume_mappings: volumes.clone(),
        };

        let response = self.control_plane.request_session(request, cancel).await?;
        let status = match response.status.as_deref() {
            Some(status) => match SessionStatus::from_operational(status) {
                // Only the poller decides about terminal states
                SessionStatus::Starting => SessionStatus::Starting,
                _ => SessionStatus::Requested,
            },
            None => SessionStatus::Requested,
        };

        info!("Requested session {} for user {}", response.kasm_id, user_id);
        Ok(SessionRecord {
            session_id: response.kasm_id,
            user_id: user_id.to_string(),
            image_id: image_id.to_string(),
            status,
            container_id: None,
            requested_at: Utc::now(),
        })
    }

    /// Poll `session` until it is running, terminal, the budget runs out or `cancel` fires.
    ///
    /// Only a running session yields a container. A session still starting
    /// when the budget runs out, or when cancelled, yields its last status
    /// without an error; a failed session is an error. A status call that
    /// times out or fails transiently uses up one attempt.
    pub async fn await_attachable(
        &self,
        session: &SessionRecord,
        budget: PollBudget,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, DeployError> {
        let mut fsm = SessionFsm::new();
        if session.status == SessionStatus::Starting {
            fsm.process(SessionEvent::Starting).map_err(DeployError::SessionError)?;
        }
        let last_known = |fsm: &SessionFsm| PollOutcome {
            status: fsm.state().clone(),
            container_id: None,
        };

        let selector = SessionSelector {
            kasm_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
        };

        for attempt in 1..=budget.attempts.max(1) {
            if cancel.is_cancelled() {
                return Ok(last_known(&fsm));
            }

            let polled = match tokio::time::timeout(
                self.status_timeout,
                self.control_plane.get_session_status(selector.clone(), cancel),
            )
            .await
            {
                Ok(Ok(response)) => Some(response),
                Ok(Err(DeployError::Cancelled(_))) => return Ok(last_known(&fsm)),
                Ok(Err(e)) if e.is_transient() => {
                    warn!(
                        "Status poll {} of session {} failed: {}",
                        attempt, session.session_id, e
                    );
                    None
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        "Status poll {} of session {} timed out after {:?}",
                        attempt, session.session_id, self.status_timeout
                    );
                    None
                }
            };

            if let Some(response) = polled {
                if let Some(outcome) = self.observe(&mut fsm, session, attempt, &response)? {
                    return Ok(outcome);
                }
            }

            if attempt < budget.attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(last_known(&fsm)),
                    _ = tokio::time::sleep(budget.interval) => {}
                }
            }
        }

        info!(
            "Session {} still {} after {} poll(s), not attaching it this run",
            session.session_id,
            fsm.state(),
            budget.attempts
        );
        Ok(last_known(&fsm))
    }

    /// Feed one status answer into `fsm`; `Some` ends the poll
    fn observe(
        &self,
        fsm: &mut SessionFsm,
        session: &SessionRecord,
        attempt: u32,
        response: &SessionStatusResponse,
    ) -> Result<Option<PollOutcome>, DeployError> {
        let status = SessionStatus::from_operational(&response.operational_status);
        let container_id = response.kasm.as_ref().and_then(|k| k.container_id.as_deref());
        debug!(
            session = %session.session_id,
            attempt,
            status = %status,
            "Polled session status"
        );

        if let Some(event) = SessionEvent::from_status(&status, container_id) {
            let event = match event {
                SessionEvent::Failed(_) => SessionEvent::Failed(
                    response
                        .operational_message
                        .clone()
                        .unwrap_or_else(|| response.operational_status.clone()),
                ),
                other => other,
            };
            fsm.process(event).map_err(DeployError::SessionError)?;
        }

        match fsm.state() {
            SessionStatus::Running => Ok(Some(PollOutcome {
                status: SessionStatus::Running,
                container_id: fsm.container_id().map(str::to_string),
            })),
            SessionStatus::Failed => Err(DeployError::SessionError(format!(
                "session {} failed: {}",
                session.session_id,
                fsm.error().unwrap_or("unknown reason")
            ))),
            SessionStatus::Unexpected(raw) => {
                warn!(
                    "Session {} reported unexpected status '{}', skipping it",
                    session.session_id, raw
                );
                Ok(Some(PollOutcome {
                    status: fsm.state().clone(),
                    container_id: None,
                }))
            }
            SessionStatus::Requested | SessionStatus::Starting => Ok(None),
        }
    }

    /// Connect `container_id` to `network` on `host`.
    ///
    /// Returns `false` when the container already was a member.
    pub async fn attach_to_network(
        &self,
        host: &HostTarget,
        container_id: &str,
        network: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, DeployError> {
        let command = format!(
            "docker network connect {} {}",
            shell_quote(network),
            shell_quote(container_id)
        );

        let result = retry_transient(&self.retry, cancel, "network connect", || {
            self.executor.run(host, &command, self.command_timeout, cancel)
        })
        .await;

        match result {
            Ok(_) => {
                info!("Attached container {} to {}", container_id, network);
                Ok(true)
            }
            Err(DeployError::CommandFailed { output, .. }) if output.contains("already exists") => {
                warn!(
                    "Container {} is already attached to {}: {}",
                    container_id, network, output
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Tear a session down
    pub async fn destroy_session(
        &self,
        session_id: &str,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let selector = SessionSelector {
            kasm_id: session_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.control_plane.destroy_session(selector, cancel).await?;
        info!("Destroyed session {}", session_id);
        Ok(())
    }
}
