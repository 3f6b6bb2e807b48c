//! Renovation workflow: analyze materials, estimate, narrate.
//!
//! Each external call runs under a timeout. A failed, timed-out or
//! unparseable step degrades to its documented fallback and is recorded in
//! [`WorkflowResult::fallbacks`]; running the workflow never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    format_aud, recommendations, CostEstimator, DetectedObject, KitchenAnalysis,
    KitchenMeasurements, MaterialGrade, MaterialLineItem, ProjectEstimate,
};
use crate::services::agents::{AgentError, AnalysisCapability, SummarizationCapability};
use crate::services::normalizer::{AgentResponseNormalizer, ResponseShape};

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    AnalyzeMaterials,
    Estimate,
    Narrate,
}

/// A step that fell back instead of using its primary result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFallback {
    pub step: WorkflowStep,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: Uuid,
    pub grade: MaterialGrade,
    pub materials: Vec<MaterialLineItem>,
    pub estimate: ProjectEstimate,
    pub narrative: String,
    pub analysis: AnalysisFindings,
    pub recommendations: Vec<String>,
    pub fallbacks: Vec<StepFallback>,
    pub generated_at: DateTime<Utc>,
}

impl WorkflowResult {
    pub fn is_degraded(&self) -> bool {
        !self.fallbacks.is_empty()
    }

    pub fn used_fallback(&self, step: WorkflowStep) -> bool {
        self.fallbacks.iter().any(|f| f.step == step)
    }
}

/// What the analysis step saw, beyond the materials list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFindings {
    pub detected_objects: Vec<DetectedObject>,
    pub measurements: KitchenMeasurements,
}

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub request_id: Option<String>,
}

#[derive(Clone)]
pub struct RenovationWorkflow {
    analysis: Arc<dyn AnalysisCapability>,
    summarizer: Arc<dyn SummarizationCapability>,
    estimator: CostEstimator,
    normalizer: AgentResponseNormalizer,
    timeout: Duration,
}

impl RenovationWorkflow {
    pub fn new(
        analysis: Arc<dyn AnalysisCapability>,
        summarizer: Arc<dyn SummarizationCapability>,
        estimator: CostEstimator,
    ) -> Self {
        Self {
            analysis,
            summarizer,
            estimator,
            normalizer: AgentResponseNormalizer::new(),
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, request_text: &str, grade: MaterialGrade) -> WorkflowResult {
        self.run_with(request_text, grade, RunOptions::default()).await
    }

    #[tracing::instrument(skip(self, request_text, options), fields(run_id = tracing::field::Empty))]
    pub async fn run_with(
        &self,
        request_text: &str,
        grade: MaterialGrade,
        options: RunOptions,
    ) -> WorkflowResult {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let timeout = options.timeout.unwrap_or(self.timeout);
        let request_id = options.request_id.as_deref();
        let mut fallbacks = Vec::new();

        let analysis = self
            .analyze_materials(request_text, timeout, request_id, &mut fallbacks)
            .await;

        let estimate = match self.estimator.estimate(&analysis.materials, grade) {
            Ok(estimate) => estimate,
            Err(e) => {
                // Materials are validated during analysis, so this only
                // happens with an estimator misconfiguration.
                record(&mut fallbacks, WorkflowStep::Estimate, e.to_string());
                empty_estimate(grade)
            }
        };

        let narrative = self
            .narrate(&analysis.materials, &estimate, timeout, request_id, &mut fallbacks)
            .await;

        let recommendations = recommendations::recommend(&analysis, &estimate);

        tracing::info!(
            grade = %grade,
            materials = analysis.materials.len(),
            total_project_cost = estimate.total_project_cost,
            fallbacks = fallbacks.len(),
            "Renovation workflow completed"
        );

        WorkflowResult {
            run_id,
            grade,
            materials: analysis.materials,
            estimate,
            narrative,
            analysis: AnalysisFindings {
                detected_objects: analysis.detected_objects,
                measurements: analysis.measurements,
            },
            recommendations,
            fallbacks,
            generated_at: Utc::now(),
        }
    }

    async fn analyze_materials(
        &self,
        request_text: &str,
        timeout: Duration,
        request_id: Option<&str>,
        fallbacks: &mut Vec<StepFallback>,
    ) -> KitchenAnalysis {
        let raw = match with_timeout(timeout, self.analysis.analyze(request_text, request_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                record(fallbacks, WorkflowStep::AnalyzeMaterials, e.to_string());
                return KitchenAnalysis::fallback();
            }
        };

        let normalized = self.normalizer.normalize(raw, &analysis_shape());
        if !normalized.is_success() {
            tracing::debug!(raw = %normalized.raw_text, "Unparseable analysis response");
            record(
                fallbacks,
                WorkflowStep::AnalyzeMaterials,
                format!("analysis response unparseable ({:?})", normalized.status),
            );
            return KitchenAnalysis::fallback();
        }

        let analysis = match KitchenAnalysis::from_map(normalized.data) {
            Ok(analysis) => analysis,
            Err(e) => {
                record(
                    fallbacks,
                    WorkflowStep::AnalyzeMaterials,
                    format!("analysis response malformed: {}", e),
                );
                return KitchenAnalysis::fallback();
            }
        };

        if analysis.materials.is_empty() {
            record(
                fallbacks,
                WorkflowStep::AnalyzeMaterials,
                "analysis returned no materials".to_string(),
            );
            return KitchenAnalysis {
                materials: KitchenAnalysis::fallback().materials,
                ..analysis
            };
        }

        if let Err(e) = analysis.materials.iter().try_for_each(|m| m.validate()) {
            record(fallbacks, WorkflowStep::AnalyzeMaterials, e.to_string());
            return KitchenAnalysis::fallback();
        }

        analysis
    }

    async fn narrate(
        &self,
        materials: &[MaterialLineItem],
        estimate: &ProjectEstimate,
        timeout: Duration,
        request_id: Option<&str>,
        fallbacks: &mut Vec<StepFallback>,
    ) -> String {
        match with_timeout(timeout, self.summarizer.summarize(materials, estimate, request_id)).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                record(fallbacks, WorkflowStep::Narrate, "summary was empty".to_string());
                templated_narrative(estimate)
            }
            Err(e) => {
                record(fallbacks, WorkflowStep::Narrate, e.to_string());
                templated_narrative(estimate)
            }
        }
    }
}

fn analysis_shape() -> ResponseShape {
    ResponseShape::any().requires_one_of(&["materials", "materials_data"])
}

async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

fn record(fallbacks: &mut Vec<StepFallback>, step: WorkflowStep, reason: String) {
    tracing::warn!(step = ?step, reason = %reason, "Workflow step fell back");
    fallbacks.push(StepFallback { step, reason });
}

fn empty_estimate(grade: MaterialGrade) -> ProjectEstimate {
    ProjectEstimate {
        grade,
        line_items: Vec::new(),
        total_material_cost: 0.0,
        total_labor_cost: 0.0,
        subtotal: 0.0,
        contingency_rate: 0.0,
        contingency: 0.0,
        total_project_cost: 0.0,
        budget_range_rate: 0.0,
        budget_range: crate::domain::BudgetRange {
            lower: 0.0,
            upper: 0.0,
        },
        total_area_sqm: 0.0,
        cost_per_sqm: 0.0,
    }
}

/// Plain report built straight from the estimate, used when no summary is available.
pub fn templated_narrative(estimate: &ProjectEstimate) -> String {
    let mut lines = vec![format!(
        "Kitchen renovation estimate ({} grade)",
        estimate.grade
    )];

    for item in &estimate.line_items {
        let location = if item.location.is_empty() {
            String::new()
        } else {
            format!(" ({})", item.location)
        };
        lines.push(format!(
            "- {}{}: {:.1} sqm, {}",
            item.material_type,
            location,
            item.area_sqm,
            format_aud(item.total_cost)
        ));
    }

    lines.push(format!("Materials: {}", format_aud(estimate.total_material_cost)));
    lines.push(format!("Labor: {}", format_aud(estimate.total_labor_cost)));
    lines.push(format!(
        "Contingency ({:.0}%): {}",
        estimate.contingency_rate * 100.0,
        format_aud(estimate.contingency)
    ));
    lines.push(format!(
        "Total project cost: {}",
        format_aud(estimate.total_project_cost)
    ));
    lines.push(format!(
        "Budget range: {} - {}",
        format_aud(estimate.budget_range.lower),
        format_aud(estimate.budget_range.upper)
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{default_materials, PriceTable};
    use crate::services::agents::{AgentClient, HttpAnalysisAgent};
    use crate::services::normalizer::RawAgentOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    enum AnalysisReply {
        Output(RawAgentOutput),
        Error(AgentError),
        Hang,
    }

    struct StubAnalysis(AnalysisReply);

    #[async_trait]
    impl AnalysisCapability for StubAnalysis {
        async fn analyze(&self, _request: &str, _request_id: Option<&str>) -> Result<RawAgentOutput, AgentError> {
            match &self.0 {
                AnalysisReply::Output(out) => Ok(out.clone()),
                AnalysisReply::Error(e) => Err(e.clone()),
                AnalysisReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(AgentError::Transport("unreachable".to_string()))
                }
            }
        }
    }

    struct StubSummary(Result<String, AgentError>);

    #[async_trait]
    impl SummarizationCapability for StubSummary {
        async fn summarize(
            &self,
            _materials: &[MaterialLineItem],
            _estimate: &ProjectEstimate,
            _request_id: Option<&str>,
        ) -> Result<String, AgentError> {
            self.0.clone()
        }
    }

    fn workflow(analysis: AnalysisReply, summary: Result<String, AgentError>) -> RenovationWorkflow {
        RenovationWorkflow::new(
            Arc::new(StubAnalysis(analysis)),
            Arc::new(StubSummary(summary)),
            CostEstimator::new(Arc::new(PriceTable::reference())),
        )
        .with_timeout(Duration::from_millis(200))
    }

    fn analysis_json() -> RawAgentOutput {
        RawAgentOutput::Text(
            "Analysis complete.\n```json\n".to_string()
                + &json!({
                    "detected_objects": [{"name": "oven", "confidence": 0.8}],
                    "materials": [
                        {"material_type": "laminate", "area_sqm": 6.0, "location": "countertop"},
                        {"material_type": "vinyl", "area_sqm": 12.0, "location": "flooring"}
                    ],
                    "measurements": {"total_kitchen_area": 18.0}
                })
                .to_string()
                + "\n```",
        )
    }

    #[tokio::test]
    async fn happy_path_uses_agent_results() {
        let wf = workflow(
            AnalysisReply::Output(analysis_json()),
            Ok("A modest laminate refresh.".to_string()),
        );
        let result = wf.run("refresh my kitchen", MaterialGrade::Economy).await;

        assert!(!result.is_degraded());
        assert_eq!(result.materials.len(), 2);
        assert_eq!(result.materials[0].material_type, "laminate");
        assert_eq!(result.analysis.detected_objects[0].name, "oven");
        assert_eq!(result.narrative, "A modest laminate refresh.");
        assert_eq!(result.estimate.grade, MaterialGrade::Economy);
        assert!(result.estimate.is_consistent());
    }

    #[tokio::test]
    async fn analysis_error_falls_back_to_default_materials() {
        let wf = workflow(
            AnalysisReply::Error(AgentError::Transport("connection refused".to_string())),
            Ok("report".to_string()),
        );
        let result = wf.run("kitchen", MaterialGrade::Standard).await;

        assert!(result.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert!(!result.used_fallback(WorkflowStep::Narrate));
        assert_eq!(result.materials, default_materials());
        assert!((result.estimate.total_project_cost - 28552.775).abs() < 1e-6);
    }

    #[tokio::test]
    async fn analysis_timeout_falls_back() {
        let wf = workflow(AnalysisReply::Hang, Ok("report".to_string()));
        let result = wf.run("kitchen", MaterialGrade::Standard).await;

        let fallback = &result.fallbacks[0];
        assert_eq!(fallback.step, WorkflowStep::AnalyzeMaterials);
        assert!(fallback.reason.contains("timed out"));
        assert_eq!(result.materials, default_materials());
    }

    #[tokio::test]
    async fn plain_text_analysis_falls_back() {
        let wf = workflow(
            AnalysisReply::Output(RawAgentOutput::Text("I could not see the image.".to_string())),
            Ok("report".to_string()),
        );
        let result = wf.run("kitchen", MaterialGrade::Premium).await;
        assert!(result.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert_eq!(result.materials, default_materials());
    }

    #[tokio::test]
    async fn negative_area_from_agent_falls_back() {
        let wf = workflow(
            AnalysisReply::Output(RawAgentOutput::Structured(json!({
                "materials": [{"material_type": "wood", "area_sqm": -4.0}]
            }))),
            Ok("report".to_string()),
        );
        let result = wf.run("kitchen", MaterialGrade::Standard).await;
        assert!(result.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert_eq!(result.materials, default_materials());
    }

    #[tokio::test]
    async fn empty_materials_keep_detections() {
        let wf = workflow(
            AnalysisReply::Output(RawAgentOutput::Structured(json!({
                "materials": [],
                "detected_objects": [{"name": "sink", "confidence": 0.9}]
            }))),
            Ok("report".to_string()),
        );
        let result = wf.run("kitchen", MaterialGrade::Standard).await;
        assert!(result.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert_eq!(result.materials, default_materials());
        assert_eq!(result.analysis.detected_objects[0].name, "sink");
    }

    #[tokio::test]
    async fn summary_failure_uses_templated_narrative() {
        let wf = workflow(
            AnalysisReply::Output(analysis_json()),
            Err(AgentError::Status {
                status: 503,
                message: "model overloaded".to_string(),
            }),
        );
        let result = wf.run("kitchen", MaterialGrade::Standard).await;

        assert!(result.used_fallback(WorkflowStep::Narrate));
        assert!(!result.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert!(result.narrative.starts_with("Kitchen renovation estimate (standard grade)"));
        assert!(result.narrative.contains("Total project cost:"));
    }

    #[tokio::test]
    async fn blank_summary_uses_templated_narrative() {
        let wf = workflow(AnalysisReply::Output(analysis_json()), Ok("   ".to_string()));
        let result = wf.run("kitchen", MaterialGrade::Standard).await;
        assert!(result.used_fallback(WorkflowStep::Narrate));
    }

    #[tokio::test]
    async fn per_run_timeout_overrides_default() {
        let wf = workflow(AnalysisReply::Hang, Ok("report".to_string()))
            .with_timeout(Duration::from_secs(3600));
        let options = RunOptions {
            timeout: Some(Duration::from_millis(50)),
            request_id: Some("req-1".to_string()),
        };
        let result = wf.run_with("kitchen", MaterialGrade::Standard, options).await;
        assert!(result.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert!(result.fallbacks[0].reason.contains("after 50ms"));
    }

    /// Local HTTP agent that answers every request after `delay`.
    async fn slow_agent(delay: Duration, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            request.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&request).to_lowercase();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + content_length {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn per_run_timeout_can_exceed_configured_timeout() {
        let base = slow_agent(
            Duration::from_millis(400),
            r#"{"materials": [{"material_type": "vinyl", "area_sqm": 10.0, "location": "flooring"}]}"#,
        )
        .await;
        let agent = HttpAnalysisAgent::new(AgentClient::new(&base, None, 0).unwrap());
        let wf = RenovationWorkflow::new(
            Arc::new(agent),
            Arc::new(StubSummary(Ok("report".to_string()))),
            CostEstimator::new(Arc::new(PriceTable::reference())),
        )
        .with_timeout(Duration::from_millis(100));

        let configured = wf.run("kitchen", MaterialGrade::Standard).await;
        assert!(configured.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert!(configured.fallbacks[0].reason.contains("after 100ms"));

        let options = RunOptions {
            timeout: Some(Duration::from_secs(5)),
            request_id: None,
        };
        let extended = wf.run_with("kitchen", MaterialGrade::Standard, options).await;
        assert!(!extended.used_fallback(WorkflowStep::AnalyzeMaterials));
        assert_eq!(extended.materials, vec![MaterialLineItem::new("vinyl", 10.0, "flooring")]);
    }

    #[test]
    fn templated_narrative_reports_figures() {
        let estimate = CostEstimator::new(Arc::new(PriceTable::reference()))
            .estimate(&default_materials(), MaterialGrade::Standard)
            .unwrap();
        let text = templated_narrative(&estimate);

        assert!(text.contains("- wood (cabinet): 14.0 sqm, $9,016 AUD"));
        assert!(text.contains("Contingency (15%): $3,724 AUD"));
        assert!(text.contains("Total project cost: $28,553 AUD"));
        assert!(text.contains("Budget range: $24,270 AUD - $32,836 AUD"));
    }
}
