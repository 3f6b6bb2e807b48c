use anyhow::Result;
use std::sync::Arc;

use renovation_estimator::{
    app, config, logging,
    domain::PriceTable,
    services::{AgentClient, AnalysisCapability, HttpAnalysisAgent, HttpSummaryAgent, SummarizationCapability},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env)?;

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        default_grade = %settings.default_grade,
        "Starting renovation estimator"
    );

    let analysis_client = AgentClient::new(
        &settings.analysis_agent_url,
        settings.agent_token.as_deref(),
        settings.agent_retry_window_seconds,
    )?;
    let summary_client = AgentClient::new(
        &settings.summary_agent_url,
        settings.agent_token.as_deref(),
        settings.agent_retry_window_seconds,
    )?;

    let analysis: Arc<dyn AnalysisCapability> = Arc::new(HttpAnalysisAgent::new(analysis_client));
    let summarizer: Arc<dyn SummarizationCapability> =
        Arc::new(HttpSummaryAgent::new(summary_client));

    // Agent reachability is informational; the workflow falls back when they are down
    tokio::spawn({
        let analysis = analysis.clone();
        let summarizer = summarizer.clone();
        async move {
            let (analysis_result, summary_result) =
                tokio::join!(analysis.health_check(), summarizer.health_check());
            match analysis_result {
                Ok(()) => tracing::info!("Analysis agent is healthy"),
                Err(e) => tracing::warn!(error = %e, "Analysis agent health check failed - workflow will use default materials"),
            }
            match summary_result {
                Ok(()) => tracing::info!("Summary agent is healthy"),
                Err(e) => tracing::warn!(error = %e, "Summary agent health check failed - workflow will use templated reports"),
            }
        }
    });

    let state = app::AppState::new(settings.clone(), PriceTable::reference(), analysis, summarizer)?;

    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
