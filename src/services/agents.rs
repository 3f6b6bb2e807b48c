//! Agent capabilities and the HTTP client that reaches deployed agents.
//!
//! The workflow only sees the [`AnalysisCapability`] and
//! [`SummarizationCapability`] traits. [`AgentClient`] speaks the AgentCore
//! style invocation contract (`POST /invocations`, `GET /ping`); the adapters
//! on top of it implement the traits. Other transports plug in as further
//! trait implementations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::domain::{format_aud, MaterialLineItem, ProjectEstimate};
use crate::services::normalizer::RawAgentOutput;

/// Failure of an external agent call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("agent call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("agent unavailable: {0}")]
    Transport(String),

    #[error("agent returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unreadable agent response: {0}")]
    InvalidBody(String),
}

/// Kitchen analysis: turns a request into detected objects, materials and
/// measurements, in whatever shape the agent chooses to answer.
#[async_trait]
pub trait AnalysisCapability: Send + Sync {
    async fn analyze(&self, request: &str, request_id: Option<&str>) -> Result<RawAgentOutput, AgentError>;

    async fn health_check(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// LLM completion producing a human-readable report for an estimate.
#[async_trait]
pub trait SummarizationCapability: Send + Sync {
    async fn summarize(
        &self,
        materials: &[MaterialLineItem],
        estimate: &ProjectEstimate,
        request_id: Option<&str>,
    ) -> Result<String, AgentError>;

    async fn health_check(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

// =============================================================================
// HTTP client
// =============================================================================

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one deployed agent runtime.
#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry_window: Duration,
}

impl AgentClient {
    /// Create a new agent client. A zero `retry_window_seconds` disables retries.
    ///
    /// Only connecting is time-limited here; callers bound the whole call
    /// (the workflow applies its per-run timeout).
    pub fn new(base_url: &str, token: Option<&str>, retry_window_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, "Agent client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(|t| t.to_string()),
            retry_window: Duration::from_secs(retry_window_seconds),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Invoke the agent and return the raw response body.
    ///
    /// Transport failures and 5xx responses are retried with exponential
    /// backoff while inside the retry window; other failures are returned as is.
    pub async fn invoke(&self, payload: &Value, request_id: Option<&str>) -> Result<String, AgentError> {
        let url = format!("{}/invocations", self.base_url);

        if self.retry_window.is_zero() {
            return self
                .send_once(&url, payload, request_id)
                .await
                .map_err(into_inner);
        }

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_window),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || self.send_once(&url, payload, request_id)).await
    }

    async fn send_once(
        &self,
        url: &str,
        payload: &Value,
        request_id: Option<&str>,
    ) -> Result<String, backoff::Error<AgentError>> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json");

        if let Some(token) = &self.token {
            req = req.header("X-Internal-Token", token);
        }
        if let Some(rid) = request_id {
            req = req.header("x-request-id", rid);
        }

        debug!(url = %url, "Agent request");

        let response = req.json(payload).send().await.map_err(|e| {
            warn!(error = %e, "Agent request failed");
            backoff::Error::transient(classify(e, CONNECT_TIMEOUT))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!(error = %e, "Failed to read agent response");
            backoff::Error::permanent(AgentError::InvalidBody(e.to_string()))
        })?;

        if status.is_success() {
            return Ok(body);
        }

        let err = AgentError::Status {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or_else(|| format!("agent error: {}", status)),
        };
        error!(status = %status, "Agent returned an error");

        if status.is_server_error() {
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }

    /// Check the agent runtime is reachable.
    pub async fn health_check(&self) -> Result<(), AgentError> {
        let url = format!("{}/ping", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify(e, HEALTH_TIMEOUT))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::Status {
                status: response.status().as_u16(),
                message: "agent unhealthy".to_string(),
            })
        }
    }
}

fn classify(err: reqwest::Error, limit: Duration) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout {
            after_ms: limit.as_millis() as u64,
        }
    } else {
        AgentError::Transport(err.to_string())
    }
}

fn into_inner(err: backoff::Error<AgentError>) -> AgentError {
    match err {
        backoff::Error::Permanent(err) | backoff::Error::Transient { err, .. } => err,
    }
}

/// Pull a readable message out of an agent error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(|s| s.to_string())
}

// =============================================================================
// Capability adapters
// =============================================================================

/// Kitchen analysis agent reached over HTTP.
#[derive(Clone)]
pub struct HttpAnalysisAgent {
    client: AgentClient,
}

impl HttpAnalysisAgent {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalysisCapability for HttpAnalysisAgent {
    #[instrument(skip(self, request), fields(agent = %self.client.base_url()))]
    async fn analyze(&self, request: &str, request_id: Option<&str>) -> Result<RawAgentOutput, AgentError> {
        let payload = json!({
            "prompt": format!("Analyze kitchen for renovation planning: {}", request),
        });

        let body = self.client.invoke(&payload, request_id).await?;
        Ok(RawAgentOutput::Text(strip_event_stream(&body)))
    }

    async fn health_check(&self) -> Result<(), AgentError> {
        self.client.health_check().await
    }
}

/// Summarization agent reached over HTTP.
#[derive(Clone)]
pub struct HttpSummaryAgent {
    client: AgentClient,
}

impl HttpSummaryAgent {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SummarizationCapability for HttpSummaryAgent {
    #[instrument(skip_all, fields(agent = %self.client.base_url(), grade = %estimate.grade))]
    async fn summarize(
        &self,
        materials: &[MaterialLineItem],
        estimate: &ProjectEstimate,
        request_id: Option<&str>,
    ) -> Result<String, AgentError> {
        let payload = json!({
            "prompt": summary_prompt(materials, estimate),
            "materials_data": materials,
            "cost_grade": estimate.grade,
            "estimate": estimate,
        });

        let body = self.client.invoke(&payload, request_id).await?;
        Ok(clean_narrative(&body))
    }

    async fn health_check(&self) -> Result<(), AgentError> {
        self.client.health_check().await
    }
}

/// Prompt asking the model to write up an already-computed estimate.
pub fn summary_prompt(materials: &[MaterialLineItem], estimate: &ProjectEstimate) -> String {
    let mut prompt = format!(
        "Write a concise kitchen renovation cost report for {} grade materials. \
         Use the figures below exactly as given; do not recalculate them. \
         Costs are in Australian dollars and areas in square metres.\n\nMaterials:\n",
        estimate.grade
    );

    for (item, line) in materials.iter().zip(&estimate.line_items) {
        prompt.push_str(&format!(
            "- {} ({}): {:.1} sqm, material {}, labor {}\n",
            item.material_type,
            if item.location.is_empty() { "unspecified" } else { item.location.as_str() },
            item.area_sqm,
            format_aud(line.total_material_cost),
            format_aud(line.labor_cost),
        ));
    }

    prompt.push_str(&format!(
        "\nTotal materials: {}\nTotal labor: {}\nContingency ({:.0}%): {}\n\
         Total project cost: {}\nBudget range: {} - {}\n",
        format_aud(estimate.total_material_cost),
        format_aud(estimate.total_labor_cost),
        estimate.contingency_rate * 100.0,
        format_aud(estimate.contingency),
        format_aud(estimate.total_project_cost),
        format_aud(estimate.budget_range.lower),
        format_aud(estimate.budget_range.upper),
    ));

    prompt
}

/// Join the payloads of a `data:` event stream; other bodies pass through.
fn strip_event_stream(body: &str) -> String {
    if !body.lines().any(|line| line.starts_with("data:")) {
        return body.to_string();
    }

    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| {
            let data = data.strip_prefix(' ').unwrap_or(data);
            // Streamed chunks are often JSON string literals.
            match serde_json::from_str::<Value>(data) {
                Ok(Value::String(chunk)) => chunk,
                _ => data.to_string(),
            }
        })
        .collect()
}

/// Reduce a summarization response to its prose.
fn clean_narrative(body: &str) -> String {
    let text = strip_event_stream(body);

    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::String(inner)) => inner.trim().to_string(),
        Ok(Value::Object(map)) => ["narrative", "result", "response", "text"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| text.trim().to_string()),
        _ => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CostEstimator, MaterialGrade, PriceTable};
    use std::sync::Arc;

    #[test]
    fn event_stream_chunks_are_joined() {
        let body = "data: \"Kitchen \"\n\ndata: \"report\"\n";
        assert_eq!(strip_event_stream(body), "Kitchen report");
        assert_eq!(strip_event_stream("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn narrative_is_unwrapped() {
        assert_eq!(clean_narrative("\"A fine kitchen.\""), "A fine kitchen.");
        assert_eq!(clean_narrative("{\"result\": \" Report \"}"), "Report");
        assert_eq!(clean_narrative("  plain prose \n"), "plain prose");
        assert_eq!(clean_narrative("{\"other\": 1}"), "{\"other\": 1}");
    }

    #[test]
    fn error_message_prefers_message_field() {
        assert_eq!(
            error_message(r#"{"code": "X", "message": "model throttled"}"#),
            Some("model throttled".to_string())
        );
        assert_eq!(error_message(r#"{"error": "bad grade"}"#), Some("bad grade".to_string()));
        assert_eq!(error_message("gateway timeout"), None);
    }

    #[test]
    fn summary_prompt_lists_each_material() {
        let materials = vec![
            MaterialLineItem::new("wood", 14.0, "cabinet"),
            MaterialLineItem::new("tile", 18.5, ""),
        ];
        let estimate = CostEstimator::new(Arc::new(PriceTable::reference()))
            .estimate(&materials, MaterialGrade::Standard)
            .unwrap();

        let prompt = summary_prompt(&materials, &estimate);
        assert!(prompt.contains("standard grade"));
        assert!(prompt.contains("- wood (cabinet): 14.0 sqm, material $3,920 AUD, labor $5,096 AUD"));
        assert!(prompt.contains("- tile (unspecified)"));
        assert!(prompt.contains("Contingency (15%)"));
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = AgentClient::new("http://localhost:8081/", None, 0).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8081");
    }

    #[tokio::test]
    async fn unreachable_agent_is_a_transport_error() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let client = AgentClient::new("http://127.0.0.1:9", None, 0).unwrap();
        let err = client.invoke(&json!({"prompt": "hi"}), None).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Transport(_) | AgentError::Timeout { .. }
        ));
    }
}
