use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::domain::{EstimateOptions, MaterialLineItem};
use crate::error::ApiResult;

use super::resolve_grade;

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub materials: Vec<MaterialLineItem>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub contingency_rate: Option<f64>,
    #[serde(default)]
    pub budget_range_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub materials: Vec<MaterialLineItem>,
}

/// POST /estimates
pub async fn create_estimate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EstimateRequest>,
) -> ApiResult<impl IntoResponse> {
    let grade = resolve_grade(req.grade.as_deref(), state.settings.default_grade)?;
    let defaults = state.estimator.options();
    let options = EstimateOptions {
        contingency_rate: req.contingency_rate.unwrap_or(defaults.contingency_rate),
        budget_range_rate: req.budget_range_rate.unwrap_or(defaults.budget_range_rate),
    };

    tracing::info!(grade = %grade, items = req.materials.len(), "Estimating project");

    let estimate = state.estimator.estimate_with(&req.materials, grade, &options)?;
    Ok(Json(DataResponse::new(estimate)))
}

/// POST /estimates/compare
pub async fn compare_grades(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompareRequest>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(items = req.materials.len(), "Comparing grades");

    let comparison = state.comparator.compare(&req.materials)?;
    Ok(Json(DataResponse::new(comparison)))
}
