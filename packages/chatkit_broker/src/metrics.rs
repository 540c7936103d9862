//! Broker metrics for observability
//!
//! Counters for session requests, upstream traffic and failure classes.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Why a session request did not end in a client secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Missing credential or workflow id
    Configuration,
    /// Upstream answered with a non-success status
    UpstreamRejected,
    /// Timeout, network or other transport failure after retries
    Transport,
}

/// Broker-wide metrics
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    // Request metrics
    /// Session requests received (POST only)
    pub session_requests: AtomicU64,
    /// Client secrets handed out
    pub sessions_issued: AtomicU64,
    /// Anonymous identity cookies minted
    pub cookies_issued: AtomicU64,

    // Upstream metrics
    /// Calls made to the session API, retries included
    pub upstream_attempts: AtomicU64,
    /// Attempts beyond the first
    pub upstream_retries: AtomicU64,

    // Error metrics
    pub configuration_errors: AtomicU64,
    pub upstream_rejections: AtomicU64,
    pub transport_errors: AtomicU64,

    /// Start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn session_requested(&self) {
        self.session_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_issued(&self) {
        self.sessions_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cookie_issued(&self) {
        self.cookies_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_called(&self, attempts: u32) {
        let attempts = u64::from(attempts);
        self.upstream_attempts.fetch_add(attempts, Ordering::Relaxed);
        self.upstream_retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
    }

    pub fn failure(&self, class: FailureClass) {
        let counter = match class {
            FailureClass::Configuration => &self.configuration_errors,
            FailureClass::UpstreamRejected => &self.upstream_rejections,
            FailureClass::Transport => &self.transport_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            sessions: SessionMetrics {
                requested: self.session_requests.load(Ordering::Relaxed),
                issued: self.sessions_issued.load(Ordering::Relaxed),
                cookies_issued: self.cookies_issued.load(Ordering::Relaxed),
            },
            upstream: UpstreamMetrics {
                attempts: self.upstream_attempts.load(Ordering::Relaxed),
                retries: self.upstream_retries.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                configuration: self.configuration_errors.load(Ordering::Relaxed),
                upstream_rejected: self.upstream_rejections.load(Ordering::Relaxed),
                transport: self.transport_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sessions: SessionMetrics,
    pub upstream: UpstreamMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub requested: u64,
    pub issued: u64,
    pub cookies_issued: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamMetrics {
    pub attempts: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub configuration: u64,
    pub upstream_rejected: u64,
    pub transport: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub credential_configured: bool,
    pub default_workflow_configured: bool,
    pub sessions_issued: u64,
    pub uptime_secs: u64,
}
