//! Material and labor cost rollup.
//!
//! All money values are AUD as plain `f64`; nothing is rounded here.
//! Rounding to whole dollars is left to presentation (see [`format_aud`]).

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use super::pricing::{MaterialGrade, PriceTable};
use crate::error::EstimateError;

pub const DEFAULT_CONTINGENCY_RATE: f64 = 0.15;
pub const DEFAULT_BUDGET_RANGE_RATE: f64 = 0.15;

/// Relative tolerance for the rollup consistency checks.
const ROLLUP_TOLERANCE: f64 = 1e-6;

fn unknown_material() -> String {
    "unknown".to_string()
}

/// Agents sometimes send areas as strings ("14.0").
fn lenient_area<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Area {
        Number(f64),
        Text(String),
    }

    match Area::deserialize(deserializer)? {
        Area::Number(n) => Ok(n),
        Area::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// One material application in a renovation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialLineItem {
    #[serde(default = "unknown_material", alias = "type")]
    pub material_type: String,
    #[serde(default, alias = "area", deserialize_with = "lenient_area")]
    pub area_sqm: f64,
    /// Informational only; not used in cost math.
    #[serde(default)]
    pub location: String,
}

impl MaterialLineItem {
    pub fn new(material_type: impl Into<String>, area_sqm: f64, location: impl Into<String>) -> Self {
        Self {
            material_type: material_type.into(),
            area_sqm,
            location: location.into(),
        }
    }

    pub fn validate(&self) -> Result<(), EstimateError> {
        if !self.area_sqm.is_finite() {
            return Err(EstimateError::invalid(format!(
                "area_sqm for '{}' must be a finite number",
                self.material_type
            )));
        }
        if self.area_sqm < 0.0 {
            return Err(EstimateError::invalid(format!(
                "area_sqm for '{}' must not be negative (got {})",
                self.material_type, self.area_sqm
            )));
        }
        Ok(())
    }
}

/// Rates applied on top of the material and labor subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateOptions {
    pub contingency_rate: f64,
    pub budget_range_rate: f64,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            contingency_rate: DEFAULT_CONTINGENCY_RATE,
            budget_range_rate: DEFAULT_BUDGET_RANGE_RATE,
        }
    }
}

impl EstimateOptions {
    pub fn validate(&self) -> Result<(), EstimateError> {
        check_rate("contingency_rate", self.contingency_rate)?;
        check_rate("budget_range_rate", self.budget_range_rate)
    }
}

fn check_rate(name: &str, rate: f64) -> Result<(), EstimateError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(EstimateError::invalid(format!(
            "{} must be between 0 and 1 (got {})",
            name, rate
        )))
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Cost of a single line item at one grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub material_type: String,
    pub location: String,
    pub area_sqm: f64,
    pub unit_cost: f64,
    pub labor_multiplier: f64,
    pub total_material_cost: f64,
    pub labor_cost: f64,
    pub total_cost: f64,
    pub grade: MaterialGrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub lower: f64,
    pub upper: f64,
}

/// Aggregate estimate for a whole project at one grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEstimate {
    pub grade: MaterialGrade,
    pub line_items: Vec<CostEstimate>,
    pub total_material_cost: f64,
    pub total_labor_cost: f64,
    pub subtotal: f64,
    pub contingency_rate: f64,
    pub contingency: f64,
    pub total_project_cost: f64,
    pub budget_range_rate: f64,
    pub budget_range: BudgetRange,
    pub total_area_sqm: f64,
    pub cost_per_sqm: f64,
}

impl ProjectEstimate {
    /// Whether the rollup adds up within relative tolerance.
    pub fn is_consistent(&self) -> bool {
        let material: f64 = self.line_items.iter().map(|i| i.total_material_cost).sum();
        let labor: f64 = self.line_items.iter().map(|i| i.labor_cost).sum();

        approx_eq(self.total_material_cost, material)
            && approx_eq(self.total_labor_cost, labor)
            && approx_eq(self.subtotal, self.total_material_cost + self.total_labor_cost)
            && approx_eq(self.total_project_cost, self.subtotal + self.contingency)
    }

    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }
}

pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= ROLLUP_TOLERANCE * scale
}

/// Format an amount as whole Australian dollars, e.g. `$28,553 AUD`.
pub fn format_aud(amount: f64) -> String {
    let rounded = amount.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if negative {
        format!("-${} AUD", grouped)
    } else {
        format!("${} AUD", grouped)
    }
}

// ============================================================================
// Estimator
// ============================================================================

/// Computes project estimates against an injected price table.
///
/// Stateless apart from its configuration; cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    prices: Arc<PriceTable>,
    options: EstimateOptions,
}

impl CostEstimator {
    pub fn new(prices: Arc<PriceTable>) -> Self {
        Self {
            prices,
            options: EstimateOptions::default(),
        }
    }

    pub fn with_options(prices: Arc<PriceTable>, options: EstimateOptions) -> Result<Self, EstimateError> {
        options.validate()?;
        Ok(Self { prices, options })
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn options(&self) -> EstimateOptions {
        self.options
    }

    /// Estimate using the configured rates.
    pub fn estimate(
        &self,
        line_items: &[MaterialLineItem],
        grade: MaterialGrade,
    ) -> Result<ProjectEstimate, EstimateError> {
        self.estimate_with(line_items, grade, &self.options)
    }

    pub fn estimate_with(
        &self,
        line_items: &[MaterialLineItem],
        grade: MaterialGrade,
        options: &EstimateOptions,
    ) -> Result<ProjectEstimate, EstimateError> {
        options.validate()?;

        let items = line_items
            .iter()
            .map(|item| self.estimate_item(item, grade))
            .collect::<Result<Vec<_>, _>>()?;

        let total_material_cost: f64 = items.iter().map(|i| i.total_material_cost).sum();
        let total_labor_cost: f64 = items.iter().map(|i| i.labor_cost).sum();
        let total_area_sqm: f64 = items.iter().map(|i| i.area_sqm).sum();

        // Contingency applies to materials plus labor.
        let subtotal = total_material_cost + total_labor_cost;
        let contingency = subtotal * options.contingency_rate;
        let total_project_cost = subtotal + contingency;

        let budget_range = BudgetRange {
            lower: total_project_cost * (1.0 - options.budget_range_rate),
            upper: total_project_cost * (1.0 + options.budget_range_rate),
        };

        let cost_per_sqm = if total_area_sqm > 0.0 {
            total_project_cost / total_area_sqm
        } else {
            0.0
        };

        tracing::debug!(
            grade = %grade,
            items = items.len(),
            total_project_cost,
            "Project estimate computed"
        );

        Ok(ProjectEstimate {
            grade,
            line_items: items,
            total_material_cost,
            total_labor_cost,
            subtotal,
            contingency_rate: options.contingency_rate,
            contingency,
            total_project_cost,
            budget_range_rate: options.budget_range_rate,
            budget_range,
            total_area_sqm,
            cost_per_sqm,
        })
    }

    pub fn estimate_item(
        &self,
        item: &MaterialLineItem,
        grade: MaterialGrade,
    ) -> Result<CostEstimate, EstimateError> {
        item.validate()?;

        let entry = self.prices.lookup(&item.material_type, grade);
        let total_material_cost = item.area_sqm * entry.unit_cost_aud_per_sqm;
        let labor_cost = total_material_cost * entry.labor_multiplier;

        Ok(CostEstimate {
            material_type: item.material_type.clone(),
            location: item.location.clone(),
            area_sqm: item.area_sqm,
            unit_cost: entry.unit_cost_aud_per_sqm,
            labor_multiplier: entry.labor_multiplier,
            total_material_cost,
            labor_cost,
            total_cost: total_material_cost + labor_cost,
            grade,
        })
    }
}
