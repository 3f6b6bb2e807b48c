use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub analysis_agent: String,
    pub summary_agent: String,
}

/// Health check endpoint.
///
/// Always 200: the workflow degrades to fallbacks when an agent is down.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (analysis_result, summary_result) = tokio::join!(
        state.analysis.health_check(),
        state.summarizer.health_check(),
    );

    if let Err(e) = &analysis_result {
        tracing::debug!(error = %e, "Analysis agent health check failed");
    }
    if let Err(e) = &summary_result {
        tracing::debug!(error = %e, "Summary agent health check failed");
    }

    let status = if analysis_result.is_ok() && summary_result.is_ok() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: ServiceHealth {
            analysis_agent: probe_status(analysis_result.is_ok()),
            summary_agent: probe_status(summary_result.is_ok()),
        },
    })
}

fn probe_status(ok: bool) -> String {
    let status = if ok { "ok" } else { "error" };
    status.to_string()
}
