use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::BrokerState;
use crate::error::{BrokerError, no_cache_json};
use crate::identity;
use crate::retry;
use crate::upstream::{self, UpstreamSessionRequest};

/// Body accepted by `POST /api/create-session`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub workflow: Option<WorkflowSelector>,
    #[serde(default, rename = "workflowId")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub chatkit_configuration: Option<RequestedConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkflowSelector {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestedConfiguration {
    #[serde(default)]
    pub file_upload: Option<RequestedFileUpload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestedFileUpload {
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl CreateSessionRequest {
    /// Lenient parse: an empty or malformed body counts as `{}`.
    pub fn parse(body: &[u8]) -> Self {
        if body.is_empty() {
            return Self::default();
        }
        serde_json::from_slice(body).unwrap_or_else(|e| {
            debug!("Ignoring unparseable create-session body: {}", e);
            Self::default()
        })
    }

    /// Nested `workflow.id`, then flat `workflowId`, then the configured
    /// default. The first source that is present wins, even when empty.
    pub fn resolve_workflow_id(&self, default: Option<&str>) -> Option<String> {
        self.workflow
            .as_ref()
            .and_then(|w| w.id.clone())
            .or_else(|| self.workflow_id.clone())
            .or_else(|| default.map(str::to_string))
            .filter(|id| !id.is_empty())
    }

    pub fn file_upload_enabled(&self) -> bool {
        self.chatkit_configuration
            .as_ref()
            .and_then(|c| c.file_upload.as_ref())
            .and_then(|f| f.enabled)
            .unwrap_or(true)
    }
}

/// Mint a short-lived ChatKit client secret for the calling browser.
pub async fn create_session(
    State(state): State<BrokerState>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    state.metrics.session_requested();

    if state.config.upstream.api_key.is_none() {
        error!("Session request rejected: no API key configured");
        return fail(&state, BrokerError::MissingApiKey);
    }

    let request = CreateSessionRequest::parse(&body);
    let (user, jar) = identity::resolve_user(jar, state.config.server.secure_cookies);
    if user.issued {
        state.metrics.cookie_issued();
    }

    let Some(workflow_id) =
        request.resolve_workflow_id(state.config.upstream.default_workflow_id.as_deref())
    else {
        warn!("Session request without a workflow id");
        return (jar, fail(&state, BrokerError::MissingWorkflowId)).into_response();
    };

    debug!(
        workflow_id = %workflow_id,
        new_user = user.issued,
        "Creating ChatKit session"
    );

    let upstream_request =
        UpstreamSessionRequest::new(workflow_id, user.id, request.file_upload_enabled());
    let api = state.session_api.as_ref();
    let timeout = state.config.upstream.timeout;
    let outcome = retry::with_retry(&state.config.retry, |_| {
        upstream::create_session_with_timeout(api, &upstream_request, timeout)
    })
    .await;
    state.metrics.upstream_called(outcome.attempts);

    let response = match outcome.result {
        Ok(reply) if reply.is_success() => {
            state.metrics.session_issued();
            info!(attempts = outcome.attempts, "Issued ChatKit session");
            no_cache_json(
                StatusCode::OK,
                json!({
                    "client_secret": reply.client_secret(),
                    "expires_after": reply.expires_after(),
                }),
            )
        }
        Ok(reply) => {
            error!(
                status = reply.status,
                status_text = %reply.status_text,
                body = %reply.body,
                "ChatKit session creation failed"
            );
            fail(&state, BrokerError::rejected(reply))
        }
        Err(err) => {
            error!(error = %err, attempts = outcome.attempts, "Create session error");
            fail(&state, BrokerError::from(err))
        }
    };

    (jar, response).into_response()
}

/// Any method other than POST on the session route.
pub async fn method_not_allowed() -> Response {
    BrokerError::MethodNotAllowed.into_response()
}

fn fail(state: &BrokerState, err: BrokerError) -> Response {
    state.metrics.failure(err.class());
    err.into_response()
}
