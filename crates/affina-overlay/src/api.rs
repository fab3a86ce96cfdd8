use crate::config::endpoint;
use affina_core::api::{
    HealthStatus, StartSessionRequest, StartSessionResponse, StopSessionRequest,
    StopSessionResponse, HEALTH_PATH, START_SESSION_PATH, STOP_SESSION_PATH,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Request/response side of the backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError>;

    async fn stop_session(
        &self,
        request: &StopSessionRequest,
    ) -> Result<StopSessionResponse, ApiError>;

    /// Never fails; transport problems are folded into the returned status.
    async fn health(&self) -> HealthStatus;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: serde::Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = endpoint(&self.base_url, path);
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("backend_response: path={path} status={}", status.as_u16());
        // The backend reports failures in the JSON body, often with a 4xx/5xx
        // status, so the body is tried before the status.
        match serde_json::from_str::<R>(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ApiError::Status(status.as_u16())),
            Err(err) => Err(ApiError::Decode(err.to_string())),
        }
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        self.post_json(START_SESSION_PATH, request).await
    }

    async fn stop_session(
        &self,
        request: &StopSessionRequest,
    ) -> Result<StopSessionResponse, ApiError> {
        self.post_json(STOP_SESSION_PATH, request).await
    }

    async fn health(&self) -> HealthStatus {
        let url = endpoint(&self.base_url, HEALTH_PATH);
        match self.client.get(url).send().await {
            Ok(response) if response.status().as_u16() == 200 => {
                let details = response.json::<Value>().await.unwrap_or(Value::Null);
                HealthStatus::Healthy { details }
            }
            Ok(response) => HealthStatus::Unhealthy {
                status: response.status().as_u16(),
            },
            Err(err) => HealthStatus::Unreachable {
                reason: err.to_string(),
            },
        }
    }
}
