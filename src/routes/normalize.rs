use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::services::{RawAgentOutput, ResponseShape};

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    /// Agent payload: a string is treated as free text, anything else as structured output.
    pub raw: Value,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// POST /normalize
pub async fn normalize_response(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NormalizeRequest>,
) -> impl IntoResponse {
    let raw = match req.raw {
        Value::String(text) => RawAgentOutput::Text(text),
        other => RawAgentOutput::Structured(other),
    };
    let shape: ResponseShape = req.required_fields.iter().collect();

    let normalized = state.normalizer.normalize(raw, &shape);
    tracing::debug!(status = ?normalized.status, method = ?normalized.parse_method, "Normalized agent payload");

    Json(DataResponse::new(normalized))
}
