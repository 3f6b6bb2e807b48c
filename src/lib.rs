//! Kitchen renovation cost estimation service.
//!
//! The cost engine in [`domain`] is pure and synchronous. [`services`] wraps the
//! external analysis and summary agents and runs the renovation workflow on
//! top of it; [`app`] and [`routes`] expose everything over HTTP.

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod services;

pub use domain::{
    CostEstimator, GradeComparator, MaterialGrade, MaterialLineItem, PriceTable, ProjectEstimate,
};
pub use error::{ApiError, EstimateError};
pub use services::{AgentResponseNormalizer, RenovationWorkflow, WorkflowResult};
