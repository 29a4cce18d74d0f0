//! Control-plane API operations

use async_trait::async_trait;
use controlplane_api::{
    CreateUserRequest, GetImagesResponse, GetUserRequest, ImageInfo, NewUser, SessionRequest,
    SessionResponse, SessionSelector, SessionStatusResponse, UserInfo, UserResponse, UserSelector,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::DeployError;
use crate::http::client::HttpClient;

/// User, image and session lifecycle against the control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_images(&self, cancel: &CancellationToken) -> Result<Vec<ImageInfo>, DeployError>;

    /// Look a user up by name; `None` when the control plane does not know it
    async fn get_user(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<UserInfo>, DeployError>;

    async fn create_user(
        &self,
        user: NewUser,
        cancel: &CancellationToken,
    ) -> Result<UserInfo, DeployError>;

    async fn request_session(
        &self,
        request: SessionRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionResponse, DeployError>;

    async fn get_session_status(
        &self,
        session: SessionSelector,
        cancel: &CancellationToken,
    ) -> Result<SessionStatusResponse, DeployError>;

    async fn destroy_session(
        &self,
        session: SessionSelector,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;
}

#[async_trait]
impl ControlPlane for HttpClient {
    async fn get_images(&self, cancel: &CancellationToken) -> Result<Vec<ImageInfo>, DeployError> {
        let response: GetImagesResponse = self
            .post("/api/public/get_images", &json!({}), cancel)
            .await?;
        Ok(response.images)
    }

    async fn get_user(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<UserInfo>, DeployError> {
        let request = GetUserRequest {
            target_user: UserSelector {
                username: username.to_string(),
            },
        };

        match self
            .post::<UserResponse, _>("/api/public/get_user", &request, cancel)
            .await
        {
            Ok(response) => Ok(response.user),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_user(
        &self,
        user: NewUser,
        cancel: &CancellationToken,
    ) -> Result<UserInfo, DeployError> {
        let username = user.username.clone();
        let request = CreateUserRequest { target_user: user };

        let response: UserResponse = self
            .post("/api/public/create_user", &request, cancel)
            .await
            .map_err(|e| match e {
                DeployError::ControlPlaneError(message) => DeployError::ConflictError(format!(
                    "creating user '{}': {}",
                    username, message
                )),
                other => other,
            })?;

        response.user.ok_or_else(|| {
            DeployError::ControlPlaneError(format!("create_user returned no user for '{}'", username))
        })
    }

    async fn request_session(
        &self,
        request: SessionRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionResponse, DeployError> {
        self.post("/api/public/request_kasm", &request, cancel).await
    }

    async fn get_session_status(
        &self,
        session: SessionSelector,
        cancel: &CancellationToken,
    ) -> Result<SessionStatusResponse, DeployError> {
        self.post("/api/public/get_kasm_status", &session, cancel).await
    }

    async fn destroy_session(
        &self,
        session: SessionSelector,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let _: Value = self.post("/api/public/destroy_kasm", &session, cancel).await?;
        Ok(())
    }
}
