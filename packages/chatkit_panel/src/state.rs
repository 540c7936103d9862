//! What the host needs to render the panel.

use serde::Serialize;

/// Overlay text shown while the first secret is being fetched.
pub const LOADING_MESSAGE: &str = "Loading assistant session...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Pending,
    Ready,
    Error,
}

/// Independent error channels plus whether a restart may help.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorState {
    pub script: Option<String>,
    pub session: Option<String>,
    pub integration: Option<String>,
    pub retryable: bool,
}

/// Snapshot published to the host on every visible change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelView {
    pub script_status: ScriptStatus,
    pub errors: ErrorState,
    /// Waiting for the first secret of this widget instance
    pub initializing: bool,
    /// A broker call is in flight
    pub refreshing: bool,
    /// Bumped on reset; hosts remount the widget when it changes
    pub instance_key: u64,
}

impl PanelView {
    pub fn new(script_status: ScriptStatus) -> Self {
        Self {
            script_status,
            errors: ErrorState::default(),
            initializing: true,
            refreshing: false,
            instance_key: 0,
        }
    }

    /// Script failures take precedence over session and integration ones.
    pub fn blocking_error(&self) -> Option<&str> {
        self.errors
            .script
            .as_deref()
            .or(self.errors.session.as_deref())
            .or(self.errors.integration.as_deref())
    }

    pub fn widget_visible(&self) -> bool {
        self.blocking_error().is_none() && !self.initializing
    }

    pub fn refreshing_badge(&self) -> bool {
        self.refreshing && self.blocking_error().is_none()
    }

    pub fn overlay_message(&self) -> Option<&str> {
        match self.blocking_error() {
            Some(err) => Some(err),
            None if self.initializing => Some(LOADING_MESSAGE),
            None => None,
        }
    }

    pub fn retry_available(&self) -> bool {
        self.blocking_error().is_some() && self.errors.retryable
    }
}
