//! What-if comparison of the same materials across every grade.

use serde::{Deserialize, Serialize};

use super::estimate::{format_aud, CostEstimator, MaterialLineItem, ProjectEstimate};
use super::pricing::MaterialGrade;
use crate::error::EstimateError;

/// Differences in total project cost between grades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeDeltas {
    pub standard_minus_economy: f64,
    pub premium_minus_standard: f64,
    pub premium_minus_economy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeComparisonResult {
    pub economy: ProjectEstimate,
    pub standard: ProjectEstimate,
    pub premium: ProjectEstimate,
    pub deltas: GradeDeltas,
    pub summaries: Vec<String>,
}

impl GradeComparisonResult {
    pub fn get(&self, grade: MaterialGrade) -> &ProjectEstimate {
        match grade {
            MaterialGrade::Economy => &self.economy,
            MaterialGrade::Standard => &self.standard,
            MaterialGrade::Premium => &self.premium,
        }
    }

    /// Grades ordered by total project cost never decrease in price.
    pub fn is_monotone(&self) -> bool {
        self.economy.total_project_cost <= self.standard.total_project_cost
            && self.standard.total_project_cost <= self.premium.total_project_cost
    }
}

#[derive(Debug, Clone)]
pub struct GradeComparator {
    estimator: CostEstimator,
}

impl GradeComparator {
    pub fn new(estimator: CostEstimator) -> Self {
        Self { estimator }
    }

    pub fn compare(&self, line_items: &[MaterialLineItem]) -> Result<GradeComparisonResult, EstimateError> {
        let economy = self.estimator.estimate(line_items, MaterialGrade::Economy)?;
        let standard = self.estimator.estimate(line_items, MaterialGrade::Standard)?;
        let premium = self.estimator.estimate(line_items, MaterialGrade::Premium)?;

        let deltas = GradeDeltas {
            standard_minus_economy: standard.total_project_cost - economy.total_project_cost,
            premium_minus_standard: premium.total_project_cost - standard.total_project_cost,
            premium_minus_economy: premium.total_project_cost - economy.total_project_cost,
        };

        let summaries = vec![
            format!("Economy grade: {}", format_aud(economy.total_project_cost)),
            format!("Standard grade: {}", format_aud(standard.total_project_cost)),
            format!("Premium grade: {}", format_aud(premium.total_project_cost)),
            format!(
                "Choosing economy over premium saves {}",
                format_aud(deltas.premium_minus_economy)
            ),
        ];

        tracing::debug!(
            items = line_items.len(),
            premium_minus_economy = deltas.premium_minus_economy,
            "Grade comparison computed"
        );

        Ok(GradeComparisonResult {
            economy,
            standard,
            premium,
            deltas,
            summaries,
        })
    }
}
