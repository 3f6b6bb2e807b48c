//! Service layer: agent clients, response normalization and the workflow.

pub mod agents;
pub mod normalizer;
pub mod workflow;

pub use agents::{
    AgentClient, AgentError, AnalysisCapability, HttpAnalysisAgent, HttpSummaryAgent,
    SummarizationCapability,
};
pub use normalizer::{
    AgentResponseNormalizer, NormalizedAgentResponse, ParseMethod, RawAgentOutput, ResponseShape,
    ResponseStatus,
};
pub use workflow::{AnalysisFindings, RenovationWorkflow, RunOptions, StepFallback, WorkflowResult, WorkflowStep};
