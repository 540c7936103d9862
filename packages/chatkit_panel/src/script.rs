//! Detecting whether the externally loaded widget component is usable.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

pub const UNAVAILABLE_MESSAGE: &str =
    "ChatKit web component is unavailable. Verify that the script URL is reachable.";

/// Signals the host forwards from the page's script loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    Loaded,
    Failed(String),
}

/// Probe for the widget's custom element.
pub trait WidgetRegistry: Send + Sync {
    fn is_registered(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Ready,
    Failed(String),
}

/// Wait for the widget to become available, giving up after `limit`.
pub async fn detect(
    registry: &dyn WidgetRegistry,
    events: &mut mpsc::Receiver<ScriptEvent>,
    limit: Duration,
) -> Detection {
    if registry.is_registered() {
        return Detection::Ready;
    }

    let deadline = Instant::now() + limit;
    match tokio::time::timeout_at(deadline, events.recv()).await {
        Ok(Some(ScriptEvent::Loaded)) => return Detection::Ready,
        Ok(Some(ScriptEvent::Failed(detail))) => {
            error!("Failed to load chatkit.js: {}", detail);
            return Detection::Failed(detail);
        }
        // Host stopped reporting; fall through to the deadline probe.
        Ok(None) => {
            debug!("Script event channel closed before detection finished");
            tokio::time::sleep_until(deadline).await;
        }
        Err(_) => {}
    }

    if registry.is_registered() {
        Detection::Ready
    } else {
        error!("ChatKit web component did not register within {:?}", limit);
        Detection::Failed(UNAVAILABLE_MESSAGE.to_string())
    }
}
