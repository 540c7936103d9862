//! Talking to the session broker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error};

/// Broker route that mints client secrets.
pub const CREATE_SESSION_PATH: &str = "/api/create-session";

/// Whole-request deadline. Outlasts the broker's own worst case at its
/// defaults (4 attempts of 10s plus 4s, 8s and 16s of backoff).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub workflow_id: String,
    pub file_upload: bool,
}

impl SessionRequest {
    fn to_body(&self) -> Value {
        json!({
            "workflow": { "id": self.workflow_id },
            "chatkit_configuration": {
                "file_upload": { "enabled": self.file_upload },
            },
        })
    }
}

/// A freshly minted secret. `expires_after` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionGrant {
    pub client_secret: String,
    pub expires_after: Value,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The broker answered with a non-success status.
    #[error("{detail}")]
    Status {
        status: u16,
        detail: String,
        expired: bool,
        retryable: bool,
    },

    #[error("Missing client secret in response")]
    MissingSecret,

    /// The broker could not be reached at all. The detail is for logs only.
    #[error("Unable to reach the session service. Please check your connection and try again.")]
    Transport(String),
}

impl SourceError {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Status { expired: true, .. })
    }

    /// Whether restarting the chat has a chance of helping.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Status { retryable, .. } => *retryable,
            Self::MissingSecret => false,
            Self::Transport(_) => true,
        }
    }
}

/// Anything that can hand the panel a client secret.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionGrant, SourceError>;
}

/// HTTP client for the broker's create-session route.
#[derive(Clone)]
pub struct BrokerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl BrokerClient {
    /// `base_url` is the broker origin, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`BrokerClient::new`] with a custom deadline. Keep it above the
    /// broker's retry budget or its structured failures never arrive.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CREATE_SESSION_PATH),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SessionSource for BrokerClient {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionGrant, SourceError> {
        debug!(workflow_id = %request.workflow_id, "Requesting ChatKit session from broker");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(request.to_body().to_string())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let raw = response.text().await.map_err(transport)?;
        let data = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!("Failed to parse create-session response: {}", e);
                json!({})
            })
        };

        if !status.is_success() {
            let fallback = status.canonical_reason().unwrap_or_default();
            let detail = extract_error_detail(&data, fallback);
            error!(status = status.as_u16(), body = %data, "Create session request failed");
            return Err(SourceError::Status {
                status: status.as_u16(),
                expired: is_expired(status.as_u16(), &data),
                retryable: is_retryable(status.as_u16(), &data),
                detail,
            });
        }

        let client_secret = data
            .get("client_secret")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(SourceError::MissingSecret)?
            .to_string();

        Ok(SessionGrant {
            client_secret,
            expires_after: data.get("expires_after").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Human-readable failure text from a broker error body.
pub fn extract_error_detail(payload: &Value, fallback: &str) -> String {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    let error = payload.get("error");
    let details = payload.get("details");
    let nested = details.and_then(|d| d.get("error"));

    text(error)
        .or_else(|| text(error.and_then(|e| e.get("message"))))
        .or_else(|| text(details))
        .or_else(|| text(nested))
        .or_else(|| text(nested.and_then(|e| e.get("message"))))
        .or_else(|| text(payload.get("message")))
        .unwrap_or_else(|| fallback.to_string())
}

fn transport(err: reqwest::Error) -> SourceError {
    error!("Session broker unreachable: {}", err);
    SourceError::Transport(err.to_string())
}

/// The broker's own `retryable` flag, else the status class.
fn is_retryable(status: u16, payload: &Value) -> bool {
    payload
        .get("retryable")
        .and_then(Value::as_bool)
        .unwrap_or(status >= 500 || status == 429)
}

fn is_expired(status: u16, payload: &Value) -> bool {
    status == 401
        || payload
            .get("error")
            .and_then(Value::as_str)
            .is_some_and(|e| e.to_lowercase().contains("expired"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> SessionRequest {
        SessionRequest {
            workflow_id: "wf_123".to_string(),
            file_upload: true,
        }
    }

    async fn respond_with(template: ResponseTemplate) -> (MockServer, BrokerClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CREATE_SESSION_PATH))
            .respond_with(template)
            .mount(&server)
            .await;
        let client = BrokerClient::new(&server.uri()).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn posts_workflow_and_file_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CREATE_SESSION_PATH))
            .and(body_json(json!({
                "workflow": {"id": "wf_123"},
                "chatkit_configuration": {"file_upload": {"enabled": true}},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "client_secret": "ek_abc",
                "expires_after": {"anchor": "created_at", "seconds": 600},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = BrokerClient::new(&format!("{}/", server.uri())).unwrap();
        assert_eq!(client.endpoint(), format!("{}/api/create-session", server.uri()));
        let grant = client.create_session(&request()).await.unwrap();
        assert_eq!(grant.client_secret, "ek_abc");
        assert_eq!(grant.expires_after["seconds"], 600);
    }

    #[tokio::test]
    async fn unauthorized_is_expired() {
        let (_server, client) =
            respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "nope"}))).await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(err.is_expired());
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn expired_wording_is_detected_case_insensitively() {
        let (_server, client) = respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "Session EXPIRED"})),
        )
        .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(err.is_expired());
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let (_server, client) = respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "OpenAI service is temporarily unavailable. Please try again.",
            "retryable": true,
        })))
        .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(!err.is_expired());
        assert!(err.retryable());
        assert_eq!(
            err.to_string(),
            "OpenAI service is temporarily unavailable. Please try again."
        );
    }

    #[tokio::test]
    async fn exhausted_timeout_keeps_broker_retryable_flag() {
        let (_server, client) = respond_with(ResponseTemplate::new(408).set_body_json(json!({
            "error": "Request timeout - session service did not respond in time",
            "retryable": true,
        })))
        .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(err.retryable());
        assert!(!err.is_expired());
    }

    #[tokio::test]
    async fn explicit_non_retryable_flag_beats_status_class() {
        let (_server, client) = respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "Session client initialization error - please retry",
            "retryable": false,
        })))
        .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn missing_flag_falls_back_to_status_class() {
        let (_server, client) =
            respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
                .await;
        assert!(client.create_session(&request()).await.unwrap_err().retryable());

        let (_server, client) =
            respond_with(ResponseTemplate::new(408).set_body_json(json!({"error": "late"}))).await;
        assert!(!client.create_session(&request()).await.unwrap_err().retryable());
    }

    #[test]
    fn default_deadline_outlasts_broker_retry_budget() {
        // 4 attempts of 10s plus 4s, 8s and 16s of backoff.
        let broker_worst_case = Duration::from_secs(4 * 10 + 4 + 8 + 16);
        assert!(DEFAULT_REQUEST_TIMEOUT > broker_worst_case);
    }

    #[tokio::test]
    async fn slow_broker_answer_still_arrives() {
        let (_server, client) = respond_with(
            ResponseTemplate::new(408)
                .set_body_json(json!({"error": "Request timeout", "retryable": true}))
                .set_delay(Duration::from_millis(300)),
        )
        .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 408, .. }));
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn client_deadline_is_configurable_and_hides_raw_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CREATE_SESSION_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"client_secret": "ek_late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client =
            BrokerClient::with_timeout(&server.uri(), Duration::from_millis(100)).unwrap();
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
        assert_eq!(
            err.to_string(),
            "Unable to reach the session service. Please check your connection and try again."
        );
    }

    #[tokio::test]
    async fn non_json_failure_falls_back_to_reason_phrase() {
        let (_server, client) =
            respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
                .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "Bad Gateway");
    }

    #[tokio::test]
    async fn success_without_secret_is_an_error() {
        let (_server, client) =
            respond_with(ResponseTemplate::new(200).set_body_json(json!({"expires_after": 1})))
                .await;
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(matches!(err, SourceError::MissingSecret));
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn unreachable_broker_is_transport_error() {
        let client = BrokerClient::new("http://127.0.0.1:1").unwrap();
        let err = client.create_session(&request()).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
        assert!(err.retryable());
    }

    #[test]
    fn detail_extraction_order() {
        let fallback = "Bad Request";
        assert_eq!(extract_error_detail(&json!({"error": "a"}), fallback), "a");
        assert_eq!(
            extract_error_detail(&json!({"error": {"message": "b"}}), fallback),
            "b"
        );
        assert_eq!(extract_error_detail(&json!({"details": "c"}), fallback), "c");
        assert_eq!(
            extract_error_detail(&json!({"details": {"error": {"message": "d"}}}), fallback),
            "d"
        );
        assert_eq!(extract_error_detail(&json!({"message": "e"}), fallback), "e");
        assert_eq!(extract_error_detail(&json!({"error": 7}), fallback), fallback);
    }
}
