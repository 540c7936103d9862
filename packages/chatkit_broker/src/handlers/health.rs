use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::BrokerState;
use crate::metrics;

/// Health check endpoint - returns broker status
pub async fn health_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    let credential_configured = state.config.upstream.api_key.is_some();
    let snapshot = state.metrics.snapshot();

    let status = if !credential_configured {
        "misconfigured"
    } else if snapshot.errors.transport == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        credential_configured,
        default_workflow_configured: state.config.upstream.default_workflow_id.is_some(),
        sessions_issued: snapshot.sessions.issued,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed broker metrics
pub async fn metrics_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - sessions can only be minted with a credential
pub async fn health_ready_handler(State(state): State<BrokerState>) -> Response {
    if state.config.upstream.api_key.is_some() {
        Json(serde_json::json!({
            "status": "ready",
            "credential": "configured"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "credential": "missing"
            })),
        )
            .into_response()
    }
}
