//! Rule-based renovation advice derived from an analysis and its estimate.

use super::analysis::KitchenAnalysis;
use super::estimate::{format_aud, ProjectEstimate};
use super::pricing::MaterialGrade;

const HIGH_COST_PER_SQM: f64 = 1000.0;
const LOW_COST_PER_SQM: f64 = 500.0;
const LARGE_GRANITE_AREA_SQM: f64 = 10.0;
const SMALL_CABINET_AREA_SQM: f64 = 10.0;
const PHASED_RENOVATION_THRESHOLD: f64 = 30000.0;

pub fn recommend(analysis: &KitchenAnalysis, estimate: &ProjectEstimate) -> Vec<String> {
    let mut recommendations = Vec::new();

    let area = analysis.kitchen_area();
    if area > 0.0 && !estimate.is_empty() {
        let cost_per_sqm = estimate.total_project_cost / area;
        if cost_per_sqm > HIGH_COST_PER_SQM && estimate.grade != MaterialGrade::Economy {
            recommendations.push(format!(
                "At {} per square metre, consider economy grade materials to reduce costs",
                format_aud(cost_per_sqm)
            ));
        } else if cost_per_sqm < LOW_COST_PER_SQM && estimate.grade != MaterialGrade::Premium {
            recommendations.push("Budget allows for premium material upgrades".to_string());
        }
    }

    if analysis.material_area("granite") > LARGE_GRANITE_AREA_SQM {
        recommendations.push(
            "Large granite area detected - consider quartz alternatives for cost savings"
                .to_string(),
        );
    }

    if analysis.cabinet_area() < SMALL_CABINET_AREA_SQM {
        recommendations
            .push("Consider additional storage solutions for better kitchen functionality".to_string());
    }

    if estimate.total_project_cost > PHASED_RENOVATION_THRESHOLD {
        recommendations.push(format!(
            "Total of {} - consider a phased renovation to manage the budget",
            format_aud(estimate.total_project_cost)
        ));
    }

    recommendations
}
