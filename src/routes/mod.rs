pub mod estimates;
pub mod health;
pub mod materials;
pub mod normalize;
pub mod workflow;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;
use crate::domain::MaterialGrade;
use crate::error::ApiResult;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        // Pricing
        .route("/materials", get(materials::list_materials))
        .route(
            "/materials/:material_type/pricing",
            get(materials::get_material_pricing),
        )
        // Estimation
        .route("/estimates", post(estimates::create_estimate))
        .route("/estimates/compare", post(estimates::compare_grades))
        // Agents
        .route("/workflow", post(workflow::run_workflow))
        .route("/normalize", post(normalize::normalize_response))
}

/// Grade from a request, or the configured default when omitted.
pub(crate) fn resolve_grade(raw: Option<&str>, default: MaterialGrade) -> ApiResult<MaterialGrade> {
    match raw.map(str::trim).filter(|g| !g.is_empty()) {
        Some(grade) => Ok(grade.parse::<MaterialGrade>()?),
        None => Ok(default),
    }
}
