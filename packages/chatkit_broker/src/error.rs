//! Failure taxonomy of the session route and its JSON rendering.
//!
//! Every failure path ends in a status-coded `{error, details?, retryable?}`
//! body carrying the same no-cache headers as a success.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::metrics::FailureClass;
use crate::retry::is_retryable_status;
use crate::upstream::{UpstreamError, UpstreamReply, extract_upstream_error};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Missing OPENAI_API_KEY environment variable")]
    MissingApiKey,

    #[error("Missing workflow id")]
    MissingWorkflowId,

    /// The session API answered, but not with a session.
    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        details: Value,
    },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl BrokerError {
    /// Translate a final non-success upstream reply into a user-facing error.
    pub fn rejected(reply: UpstreamReply) -> Self {
        let message = match reply.status {
            429 => "Rate limit exceeded. Please wait a moment and try again.".to_string(),
            401 => "Authentication failed. Please check your API key.".to_string(),
            403 => "Access forbidden. Please check your API permissions.".to_string(),
            500 => "OpenAI service is temporarily unavailable. Please try again.".to_string(),
            _ => extract_upstream_error(&reply.body)
                .unwrap_or_else(|| format!("Failed to create session: {}", reply.status_text)),
        };
        Self::Rejected {
            status: reply.status,
            message,
            details: reply.body,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingWorkflowId => StatusCode::BAD_REQUEST,
            Self::Rejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Upstream(err) => match err {
                UpstreamError::Timeout => StatusCode::REQUEST_TIMEOUT,
                UpstreamError::BodyTooLarge { .. } => StatusCode::INSUFFICIENT_STORAGE,
                UpstreamError::Initialization(_) => StatusCode::SERVICE_UNAVAILABLE,
                UpstreamError::Network(_) | UpstreamError::Other(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            Self::MethodNotAllowed | Self::MissingApiKey | Self::MissingWorkflowId => false,
            Self::Rejected { status, .. } => is_retryable_status(*status),
            Self::Upstream(err) => err.is_retryable(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::MethodNotAllowed | Self::MissingApiKey | Self::MissingWorkflowId => {
                FailureClass::Configuration
            }
            Self::Rejected { .. } => FailureClass::UpstreamRejected,
            Self::Upstream(_) => FailureClass::Transport,
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::MethodNotAllowed | Self::MissingApiKey | Self::MissingWorkflowId => {
                json!({ "error": self.to_string() })
            }
            Self::Rejected {
                message, details, ..
            } => json!({
                "error": message,
                "details": details,
                "retryable": self.retryable(),
            }),
            Self::Upstream(err) => match err {
                UpstreamError::Timeout => json!({
                    "error": "Request timeout - session service did not respond in time",
                    "retryable": true,
                }),
                UpstreamError::BodyTooLarge { .. } => json!({
                    "error": "Session response exceeded the memory limit",
                    "retryable": false,
                }),
                UpstreamError::Initialization(detail) => json!({
                    "error": "Session client initialization error - please retry",
                    "retryable": false,
                    "details": detail,
                }),
                UpstreamError::Network(detail) => json!({
                    "error": "Network error. Please check your connection and try again.",
                    "retryable": true,
                    "details": detail,
                }),
                UpstreamError::Other(detail) => json!({
                    "error": "Unexpected error",
                    "retryable": false,
                    "details": detail,
                }),
            },
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        no_cache_json(self.status(), self.payload())
    }
}

/// JSON response with the cache-busting headers every session answer carries.
pub fn no_cache_json(status: StatusCode, payload: Value) -> Response {
    let mut response = (status, Json(payload)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: u16, status_text: &str, body: Value) -> UpstreamReply {
        UpstreamReply {
            status,
            status_text: status_text.to_string(),
            body,
        }
    }

    #[test]
    fn rejected_messages_by_status() {
        let cases = [
            (429, "Rate limit exceeded. Please wait a moment and try again."),
            (401, "Authentication failed. Please check your API key."),
            (403, "Access forbidden. Please check your API permissions."),
            (500, "OpenAI service is temporarily unavailable. Please try again."),
        ];
        for (status, expected) in cases {
            let err = BrokerError::rejected(reply(status, "", json!({"error": "raw"})));
            assert_eq!(err.to_string(), expected);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn other_statuses_use_upstream_message() {
        let err = BrokerError::rejected(reply(
            400,
            "Bad Request",
            json!({"error": {"message": "workflow not found"}}),
        ));
        assert_eq!(err.to_string(), "workflow not found");
        assert!(!err.retryable());
    }

    #[test]
    fn fallback_message_uses_status_text() {
        let err = BrokerError::rejected(reply(404, "Not Found", json!({})));
        assert_eq!(err.to_string(), "Failed to create session: Not Found");
    }

    #[test]
    fn retryable_follows_status_class() {
        assert!(BrokerError::rejected(reply(502, "", json!({}))).retryable());
        assert!(BrokerError::rejected(reply(429, "", json!({}))).retryable());
        assert!(!BrokerError::rejected(reply(403, "", json!({}))).retryable());
    }

    #[test]
    fn transport_failures_map_to_distinct_statuses() {
        let status = |e: UpstreamError| BrokerError::from(e).status();
        assert_eq!(status(UpstreamError::Timeout), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            status(UpstreamError::BodyTooLarge { limit: 1 }),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            status(UpstreamError::Initialization("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(UpstreamError::Network("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(UpstreamError::Other("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn network_error_payload_is_retryable() {
        let payload = BrokerError::from(UpstreamError::Network("reset".into())).payload();
        assert_eq!(payload["retryable"], true);
        assert_eq!(payload["details"], "reset");
    }

    #[test]
    fn every_transport_payload_states_retryability() {
        let cases = [
            (UpstreamError::Timeout, true),
            (UpstreamError::Network("x".into()), true),
            (UpstreamError::BodyTooLarge { limit: 1 }, false),
            (UpstreamError::Initialization("x".into()), false),
            (UpstreamError::Other("x".into()), false),
        ];
        for (err, retryable) in cases {
            let payload = BrokerError::from(err).payload();
            assert_eq!(payload["retryable"], retryable);
        }
    }

    #[test]
    fn unexpected_error_payload() {
        let payload = BrokerError::from(UpstreamError::Other("boom".into())).payload();
        assert_eq!(payload["error"], "Unexpected error");
        assert_eq!(payload["retryable"], false);
    }

    #[test]
    fn responses_carry_no_cache_headers() {
        let resp = BrokerError::MissingWorkflowId.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()[header::PRAGMA], "no-cache");
    }
}
