//! HTTP client implementation

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::DeployError;
use crate::retry::{retry_transient, RetryPolicy};

/// HTTP client for control-plane communication.
///
/// Every request is a JSON `POST` whose body carries the API key pair.
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_key_secret: SecretString,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        api_key: String,
        api_key_secret: SecretString,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_key_secret,
            retry,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a POST request, retrying transport errors and non-2xx statuses
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, DeployError> {
        let url = format!("{}{}", self.base_url, path);
        let payload = self.authenticated(body)?;

        retry_transient(&self.retry, cancel, path, || self.post_once(&url, &payload)).await
    }

    async fn post_once<T: DeserializeOwned>(&self, url: &str, payload: &Value) -> Result<T, DeployError> {
        debug!("POST {}", url);

        let response = self.client.post(url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST failed: {} - {}", status, body);
            return Err(DeployError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        check_error_message(&body)?;
        Ok(serde_json::from_value(body)?)
    }

    /// Flatten the API key pair into the request body
    fn authenticated<B: Serialize>(&self, body: &B) -> Result<Value, DeployError> {
        let mut payload = serde_json::to_value(body)?;
        let Some(object) = payload.as_object_mut() else {
            return Err(DeployError::Internal(
                "control-plane request body must be a JSON object".to_string(),
            ));
        };
        object.insert("api_key".to_string(), Value::String(self.api_key.clone()));
        object.insert(
            "api_key_secret".to_string(),
            Value::String(self.api_key_secret.expose_secret().to_string()),
        );
        Ok(payload)
    }
}

/// The control plane reports most failures as a 200 with `error_message`
fn check_error_message(body: &Value) -> Result<(), DeployError> {
    match body.get("error_message").and_then(Value::as_str) {
        Some(message) if !message.trim().is_empty() => {
            Err(DeployError::ControlPlaneError(message.to_string()))
        }
        _ => Ok(()),
    }
}
