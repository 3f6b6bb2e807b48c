use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::error::ApiResult;

use super::resolve_grade;

#[derive(Debug, Serialize)]
pub struct MaterialList {
    pub material_types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PricingQuery {
    pub grade: Option<String>,
}

/// GET /materials
pub async fn list_materials(State(state): State<Arc<AppState>>) -> Json<DataResponse<MaterialList>> {
    Json(DataResponse::new(MaterialList {
        material_types: state.estimator.prices().material_types(),
    }))
}

/// GET /materials/:material_type/pricing?grade=
///
/// Unknown materials answer with the default entry and `is_default: true`.
pub async fn get_material_pricing(
    State(state): State<Arc<AppState>>,
    Path(material_type): Path<String>,
    Query(query): Query<PricingQuery>,
) -> ApiResult<impl IntoResponse> {
    let grade = resolve_grade(query.grade.as_deref(), state.settings.default_grade)?;
    let pricing = state.estimator.prices().describe(&material_type, grade);

    Ok(Json(DataResponse::new(pricing)))
}
