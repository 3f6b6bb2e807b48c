//! Full renovation run: analysis agent, cost engine, summary agent.

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestIdExt;
use crate::services::RunOptions;

use super::resolve_grade;

const MAX_TIMEOUT_SECONDS: u64 = 600;

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub request: String,
    #[serde(default)]
    pub grade: Option<String>,
    /// Per-call agent timeout; the configured timeout applies when omitted.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// POST /workflow
///
/// Agent failures never fail the request; they show up in `fallbacks`.
pub async fn run_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<WorkflowRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.request.trim().is_empty() {
        return Err(ApiError::bad_request("request must not be empty"));
    }

    let grade = resolve_grade(req.grade.as_deref(), state.settings.default_grade)?;
    let timeout = match req.timeout_seconds {
        Some(0) => return Err(ApiError::bad_request("timeout_seconds must be positive")),
        Some(secs) => Some(Duration::from_secs(secs.min(MAX_TIMEOUT_SECONDS))),
        None => None,
    };

    let options = RunOptions {
        timeout,
        request_id: headers.request_id().map(str::to_string),
    };

    let result = state.workflow.run_with(&req.request, grade, options).await;
    Ok(Json(DataResponse::new(result)))
}
