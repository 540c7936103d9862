use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::BrokerState;
use crate::config::{BrokerConfig, FileConfig};
use crate::metrics::BrokerMetrics;
use crate::upstream::{SessionApi, UpstreamError, UpstreamReply, UpstreamSessionRequest};

/// Scripted stand-in for the session API.
///
/// Answers are consumed front to back; the last one repeats once the script
/// runs out. Every request is recorded for inspection.
#[derive(Default)]
pub struct ScriptedSessionApi {
    script: Mutex<VecDeque<Result<UpstreamReply, UpstreamError>>>,
    last: Mutex<Option<Result<UpstreamReply, UpstreamError>>>,
    requests: Mutex<Vec<UpstreamSessionRequest>>,
    /// Simulated latency per call
    delay: Option<Duration>,
}

impl ScriptedSessionApi {
    pub fn new(script: Vec<Result<UpstreamReply, UpstreamError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn always(answer: Result<UpstreamReply, UpstreamError>) -> Self {
        Self::new(vec![answer])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<UpstreamSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionApi for ScriptedSessionApi {
    async fn create_session(
        &self,
        request: &UpstreamSessionRequest,
    ) -> Result<UpstreamReply, UpstreamError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(answer) = next {
            *last = Some(answer);
        }
        last.clone()
            .unwrap_or_else(|| Err(UpstreamError::Other("empty script".into())))
    }
}

pub fn reply(status: u16, body: Value) -> Result<UpstreamReply, UpstreamError> {
    let status_text = axum::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string();
    Ok(UpstreamReply {
        status,
        status_text,
        body,
    })
}

pub fn session_reply() -> Result<UpstreamReply, UpstreamError> {
    reply(
        200,
        json!({
            "id": "cksess_internal",
            "client_secret": "ek_test_secret",
            "expires_after": {"anchor": "created_at", "seconds": 600},
            "workflow": {"id": "wf_default"},
        }),
    )
}

/// Broker config with a credential and default workflow set.
pub fn test_config() -> BrokerConfig {
    let mut fc = FileConfig::default();
    fc.upstream.api_key = Some("sk-test".to_string());
    fc.upstream.workflow_id = Some("wf_default".to_string());
    BrokerConfig::from_file(&fc)
}

pub fn test_state(api: Arc<ScriptedSessionApi>, config: BrokerConfig) -> BrokerState {
    BrokerState {
        config: Arc::new(config),
        session_api: api,
        metrics: Arc::new(BrokerMetrics::new()),
    }
}
