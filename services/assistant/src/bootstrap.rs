//! Session bootstrap: a short-lived credential plus the instructions and tool
//! schemas for the next realtime session.

use async_trait::async_trait;
use realtime_types::ToolDefinition;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Session bootstrap timed out")]
    Timeout,
    #[error("Session bootstrap failed with status {0}")]
    Status(u16),
    #[error("Session bootstrap request failed: {0}")]
    Request(String),
    #[error("Session bootstrap returned no credential")]
    MissingCredential,
}

/// Everything the backend hands out before a session is negotiated.
#[derive(Debug)]
pub struct SessionGrant {
    pub credential: SecretString,
    pub instructions: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

#[async_trait]
pub trait SessionBootstrap: Send + Sync {
    async fn fetch(&self) -> Result<SessionGrant, BootstrapError>;
}

#[derive(Deserialize)]
struct Envelope {
    result: GrantBody,
}

#[derive(Deserialize)]
struct GrantBody {
    #[serde(default)]
    client_secret: Option<ClientSecret>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

#[derive(Deserialize)]
struct ClientSecret {
    #[serde(default)]
    value: String,
}

/// Fetches grants from `GET {backend}/session/{store}`.
pub struct HttpBootstrap {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpBootstrap {
    pub fn new(backend_url: &str, store_id: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/session/{}", backend_url.trim_end_matches('/'), store_id),
            timeout,
        }
    }
}

#[async_trait]
impl SessionBootstrap for HttpBootstrap {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch(&self) -> Result<SessionGrant, BootstrapError> {
        let response = self
            .http
            .get(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BootstrapError::Timeout
                } else {
                    BootstrapError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::Status(status.as_u16()));
        }

        let envelope: Envelope = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BootstrapError::Timeout
            } else {
                BootstrapError::Request(e.to_string())
            }
        })?;
        let body = envelope.result;
        let credential = body
            .client_secret
            .map(|secret| secret.value)
            .filter(|value| !value.is_empty())
            .ok_or(BootstrapError::MissingCredential)?;

        debug!(tools = body.tools.len(), "Session grant received.");
        Ok(SessionGrant {
            credential: SecretString::from(credential),
            instructions: body.instructions,
            tools: body.tools,
        })
    }
}
