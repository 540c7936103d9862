//! Client for the external session-issuing API.
//!
//! The broker never interprets the issued secret; it only forwards
//! `client_secret` and `expires_after` from a successful reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::UpstreamConfig;

const BETA_HEADER: &str = "OpenAI-Beta";
const BETA_VALUE: &str = "chatkit_beta=v1";

/// Body sent to `POST {api_base}/v1/chatkit/sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamSessionRequest {
    pub workflow: WorkflowRef,
    /// Anonymous user identifier from the session cookie
    pub user: String,
    pub chatkit_configuration: ChatKitConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatKitConfiguration {
    pub file_upload: FileUpload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileUpload {
    pub enabled: bool,
}

impl UpstreamSessionRequest {
    pub fn new(workflow_id: impl Into<String>, user: impl Into<String>, file_upload: bool) -> Self {
        Self {
            workflow: WorkflowRef {
                id: workflow_id.into(),
            },
            user: user.into(),
            chatkit_configuration: ChatKitConfiguration {
                file_upload: FileUpload {
                    enabled: file_upload,
                },
            },
        }
    }
}

/// Raw answer from the session API. `body` is `{}` when the payload was empty
/// or not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub status_text: String,
    pub body: Value,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn client_secret(&self) -> Value {
        self.body.get("client_secret").cloned().unwrap_or(Value::Null)
    }

    pub fn expires_after(&self) -> Value {
        self.body.get("expires_after").cloned().unwrap_or(Value::Null)
    }
}

/// Transport-level failures. Only `Timeout` and `Network` are worth retrying.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("session API did not answer within the deadline")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("response body exceeded {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("session client could not be initialized: {0}")]
    Initialization(String),

    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::Initialization(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Network(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Anything that can mint a ChatKit session.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(
        &self,
        request: &UpstreamSessionRequest,
    ) -> Result<UpstreamReply, UpstreamError>;
}

/// One attempt against `api`, cancelled once `timeout` elapses.
pub async fn create_session_with_timeout(
    api: &dyn SessionApi,
    request: &UpstreamSessionRequest,
    timeout: Duration,
) -> Result<UpstreamReply, UpstreamError> {
    match tokio::time::timeout(timeout, api.create_session(request)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout),
    }
}

/// `reqwest`-backed implementation talking to the real endpoint.
pub struct HttpSessionApi {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_body_bytes: usize,
}

impl HttpSessionApi {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| UpstreamError::Initialization(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            url: config.sessions_url(),
            api_key: config.api_key.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create_session(
        &self,
        request: &UpstreamSessionRequest,
    ) -> Result<UpstreamReply, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            UpstreamError::Initialization("no API key configured".to_string())
        })?;

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .header(BETA_HEADER, BETA_VALUE)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-cache")
            .json(request)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = response.status();
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(UpstreamError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let bytes = response.bytes().await.map_err(UpstreamError::from_reqwest)?;
        if bytes.len() > self.max_body_bytes {
            return Err(UpstreamError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let body = serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::Object(Default::default()));
        debug!(status = status.as_u16(), "Session API responded");

        Ok(UpstreamReply {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// Best human-readable error message inside an upstream failure payload.
///
/// Looks at `error`, `error.message`, `details`, `details.error`,
/// `details.error.message` and `message`, in that order.
pub fn extract_upstream_error(payload: &Value) -> Option<String> {
    let as_str = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

    let error = payload.get("error");
    if let Some(msg) = as_str(error) {
        return Some(msg);
    }
    if let Some(msg) = as_str(error.and_then(|e| e.get("message"))) {
        return Some(msg);
    }

    let details = payload.get("details");
    if let Some(msg) = as_str(details) {
        return Some(msg);
    }
    let nested = details.and_then(|d| d.get("error"));
    if let Some(msg) = as_str(nested) {
        return Some(msg);
    }
    if let Some(msg) = as_str(nested.and_then(|e| e.get("message"))) {
        return Some(msg);
    }

    as_str(payload.get("message"))
}
