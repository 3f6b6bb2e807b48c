use anyhow::{Context, Result};
use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Settings;
use crate::domain::{CostEstimator, GradeComparator, PriceTable};
use crate::middleware::request_id_layer;
use crate::routes;
use crate::services::{
    AgentResponseNormalizer, AnalysisCapability, RenovationWorkflow, SummarizationCapability,
};

/// Largest request body accepted by any endpoint.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub estimator: CostEstimator,
    pub comparator: GradeComparator,
    pub normalizer: AgentResponseNormalizer,
    pub workflow: RenovationWorkflow,
    pub analysis: Arc<dyn AnalysisCapability>,
    pub summarizer: Arc<dyn SummarizationCapability>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        prices: PriceTable,
        analysis: Arc<dyn AnalysisCapability>,
        summarizer: Arc<dyn SummarizationCapability>,
    ) -> Result<Arc<Self>> {
        let prices = Arc::new(prices);
        let estimator = CostEstimator::with_options(prices, settings.estimate_options())
            .context("Invalid estimate options")?;
        let comparator = GradeComparator::new(estimator.clone());
        let workflow = RenovationWorkflow::new(analysis.clone(), summarizer.clone(), estimator.clone())
            .with_timeout(settings.agent_timeout());

        Ok(Arc::new(Self {
            settings,
            estimator,
            comparator,
            normalizer: AgentResponseNormalizer::new(),
            workflow,
            analysis,
            summarizer,
        }))
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // DEBUG spans keep INFO output to one line per workflow run
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let (set_request_id, propagate_request_id) = request_id_layer();

    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .max_age(max_age)
}
