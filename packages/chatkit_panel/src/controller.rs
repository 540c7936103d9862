//! The panel controller: one handle per mounted widget host.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::{SessionRequest, SessionSource, SourceError};
use crate::error::PanelError;
use crate::script::{self, Detection, ScriptEvent, WidgetRegistry};
use crate::session::{self, RefreshGate, SessionCache, Turn};
use crate::state::{ErrorState, PanelView, ScriptStatus};
use crate::tools::{
    ClientTool, ColorScheme, FactAction, FactLedger, ToolResult, normalize_whitespace,
};

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Refreshing...";

/// Callbacks into the page hosting the widget.
pub trait PanelHost: Send + Sync {
    fn on_theme_request(&self, scheme: ColorScheme);

    fn on_fact_action(&self, action: FactAction);

    fn on_response_end(&self) {}
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub workflow_id: String,
    pub file_upload: bool,
    pub cache_ttl: Duration,
    pub debounce: Duration,
    pub wait_limit: Duration,
    pub script_timeout: Duration,
    /// Pause between an expired-session notice and the automatic reset
    pub expiry_reset_delay: Duration,
}

impl PanelConfig {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into().trim().to_string(),
            file_upload: true,
            cache_ttl: session::CACHE_TTL,
            debounce: session::DEBOUNCE,
            wait_limit: session::WAIT_LIMIT,
            script_timeout: script::SCRIPT_TIMEOUT,
            expiry_reset_delay: Duration::from_secs(1),
        }
    }

    /// False for an empty id or the template placeholder.
    pub fn workflow_configured(&self) -> bool {
        !self.workflow_id.is_empty() && !self.workflow_id.starts_with("wf_replace")
    }
}

struct Inner {
    config: PanelConfig,
    source: Arc<dyn SessionSource>,
    host: Arc<dyn PanelHost>,
    registry: Arc<dyn WidgetRegistry>,
    view: watch::Sender<PanelView>,
    cache: Mutex<SessionCache>,
    gate: RefreshGate,
    facts: Mutex<FactLedger>,
}

#[derive(Clone)]
pub struct PanelController {
    inner: Arc<Inner>,
}

impl PanelController {
    pub fn new(
        config: PanelConfig,
        source: Arc<dyn SessionSource>,
        host: Arc<dyn PanelHost>,
        registry: Arc<dyn WidgetRegistry>,
    ) -> Self {
        let status = if registry.is_registered() {
            ScriptStatus::Ready
        } else {
            ScriptStatus::Pending
        };
        let mut initial = PanelView::new(status);
        if !config.workflow_configured() {
            warn!("ChatKit workflow id is not configured");
            mark_unconfigured(&mut initial);
        }

        let (view, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                cache: Mutex::new(SessionCache::new(config.cache_ttl)),
                config,
                source,
                host,
                registry,
                view,
                gate: RefreshGate::default(),
                facts: Mutex::new(FactLedger::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> PanelView {
        self.inner.view.borrow().clone()
    }

    /// Apply a change and notify subscribers only if something moved.
    fn update(&self, change: impl FnOnce(&mut PanelView)) {
        self.inner.view.send_if_modified(|view| {
            let before = view.clone();
            change(view);
            *view != before
        });
    }

    /// Track the widget script until it is usable or gives up.
    pub async fn detect_script(&self, events: &mut mpsc::Receiver<ScriptEvent>) -> ScriptStatus {
        let detection = script::detect(
            self.inner.registry.as_ref(),
            events,
            self.inner.config.script_timeout,
        )
        .await;

        match detection {
            Detection::Ready => {
                self.update(|v| {
                    v.script_status = ScriptStatus::Ready;
                    v.errors.script = None;
                });
                ScriptStatus::Ready
            }
            Detection::Failed(detail) => {
                self.update(|v| {
                    v.script_status = ScriptStatus::Error;
                    v.errors.script = Some(format!("Error: {detail}"));
                    v.errors.retryable = false;
                    v.initializing = false;
                });
                ScriptStatus::Error
            }
        }
    }

    /// Secret for the widget. `current` is the secret it holds right now.
    pub async fn get_client_secret(&self, current: Option<&str>) -> Result<String, PanelError> {
        if let Some(secret) = self.inner.cache.lock().await.lookup(current, Instant::now()) {
            debug!("Using cached session secret");
            return Ok(secret);
        }

        match self.inner.gate.enter().await {
            Turn::Follower(rx) => {
                debug!("Session refresh already in progress, waiting...");
                session::follow(rx, self.inner.config.wait_limit).await
            }
            Turn::Leader(lease) => {
                tokio::time::sleep(self.inner.config.debounce).await;
                let _refreshing = RefreshingFlag::raise(self);
                let result = self.refresh(current).await;
                lease.finish(result.clone());
                result
            }
        }
    }

    async fn refresh(&self, current: Option<&str>) -> Result<String, PanelError> {
        if !self.inner.config.workflow_configured() {
            self.update(mark_unconfigured);
            return Err(PanelError::WorkflowNotConfigured);
        }

        if current.is_none() {
            debug!("Creating new session");
        }
        self.update(|v| {
            if current.is_none() {
                v.initializing = true;
            }
            v.errors.session = None;
            v.errors.integration = None;
            v.errors.retryable = false;
        });

        let request = SessionRequest {
            workflow_id: self.inner.config.workflow_id.clone(),
            file_upload: self.inner.config.file_upload,
        };
        match self.inner.source.create_session(&request).await {
            Ok(grant) => {
                self.inner
                    .cache
                    .lock()
                    .await
                    .store(grant.client_secret.clone(), Instant::now());
                self.update(|v| {
                    v.errors.session = None;
                    v.errors.integration = None;
                    v.initializing = false;
                });
                Ok(grant.client_secret)
            }
            Err(err) if err.is_expired() => {
                self.session_expired();
                Err(err.into())
            }
            Err(err) => {
                error!("Failed to create ChatKit session: {}", err);
                self.record_failure(&err);
                Err(err.into())
            }
        }
    }

    fn record_failure(&self, err: &SourceError) {
        let detail = err.to_string();
        let retryable = err.retryable();
        self.update(|v| {
            v.errors.session = Some(detail);
            v.errors.retryable = retryable;
            v.initializing = false;
        });
    }

    fn session_expired(&self) {
        warn!("Session expired, attempting to refresh...");
        self.update(|v| {
            v.errors.session = Some(SESSION_EXPIRED_MESSAGE.to_string());
            v.errors.retryable = true;
        });

        let this = self.clone();
        let delay = self.inner.config.expiry_reset_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.reset().await;
        });
    }

    pub async fn handle_tool(&self, name: &str, params: &Value) -> ToolResult {
        let tool = match ClientTool::parse(name, params) {
            Ok(tool) => tool,
            Err(err) => {
                warn!("Rejected client tool call: {}", err);
                return ToolResult::REJECTED;
            }
        };

        match tool {
            ClientTool::SwitchTheme(scheme) => {
                debug!("switch_theme {}", scheme.as_str());
                self.inner.host.on_theme_request(scheme);
            }
            ClientTool::RecordFact { fact_id, fact_text } => {
                if fact_id.is_empty() || !self.inner.facts.lock().await.admit(&fact_id) {
                    return ToolResult::OK;
                }
                self.inner.host.on_fact_action(FactAction::Save {
                    fact_id,
                    fact_text: normalize_whitespace(&fact_text),
                });
            }
        }
        ToolResult::OK
    }

    pub fn on_response_start(&self) {
        self.update(|v| {
            v.errors.integration = None;
            v.errors.retryable = false;
        });
    }

    pub fn on_response_end(&self) {
        self.inner.host.on_response_end();
    }

    pub async fn on_thread_change(&self) {
        self.inner.facts.lock().await.clear();
    }

    /// The widget shows its own errors; these are only logged.
    pub fn on_widget_error(&self, error: &str) {
        error!("ChatKit error: {}", error);
    }

    /// Start over with a fresh widget instance.
    pub async fn reset(&self) {
        info!("Resetting ChatKit panel");
        self.inner.facts.lock().await.clear();
        self.inner.cache.lock().await.clear();

        let registered = self.inner.registry.is_registered();
        let configured = self.inner.config.workflow_configured();
        self.update(|v| {
            v.script_status = if registered {
                ScriptStatus::Ready
            } else {
                ScriptStatus::Pending
            };
            v.initializing = true;
            v.refreshing = false;
            v.errors = ErrorState::default();
            v.instance_key += 1;
            if !configured {
                mark_unconfigured(v);
            }
        });
    }
}

/// Keeps `refreshing` raised while alive, including when the caller's
/// future is dropped mid-call.
struct RefreshingFlag<'a> {
    panel: &'a PanelController,
}

impl<'a> RefreshingFlag<'a> {
    fn raise(panel: &'a PanelController) -> Self {
        panel.update(|v| v.refreshing = true);
        Self { panel }
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.panel.update(|v| v.refreshing = false);
    }
}

fn mark_unconfigured(view: &mut PanelView) {
    view.errors.session = Some(PanelError::WorkflowNotConfigured.to_string());
    view.errors.retryable = false;
    view.initializing = false;
}
