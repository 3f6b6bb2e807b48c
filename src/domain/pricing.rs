//! Material grades and the static price table.
//!
//! Prices are AUD per square metre. Labor cost for a material is its material
//! cost scaled by the labor multiplier of the same grade.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EstimateError;

/// Quality/price tier for renovation materials, ordered cheapest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MaterialGrade {
    Economy,
    #[default]
    Standard,
    Premium,
}

impl MaterialGrade {
    pub const ALL: [MaterialGrade; 3] = [
        MaterialGrade::Economy,
        MaterialGrade::Standard,
        MaterialGrade::Premium,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialGrade::Economy => "economy",
            MaterialGrade::Standard => "standard",
            MaterialGrade::Premium => "premium",
        }
    }
}

impl fmt::Display for MaterialGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialGrade {
    type Err = EstimateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "economy" => Ok(MaterialGrade::Economy),
            "standard" => Ok(MaterialGrade::Standard),
            "premium" => Ok(MaterialGrade::Premium),
            other => Err(EstimateError::invalid(format!(
                "unknown grade '{}', expected economy, standard or premium",
                other
            ))),
        }
    }
}

/// Unit cost and labor multiplier for one (material, grade) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub unit_cost_aud_per_sqm: f64,
    pub labor_multiplier: f64,
}

impl PriceEntry {
    /// Entry used for any material the table does not know.
    pub const DEFAULT: PriceEntry = PriceEntry::new(100.0, 1.2);

    pub const fn new(unit_cost_aud_per_sqm: f64, labor_multiplier: f64) -> Self {
        Self {
            unit_cost_aud_per_sqm,
            labor_multiplier,
        }
    }

    pub fn labor_cost_per_sqm(&self) -> f64 {
        self.unit_cost_aud_per_sqm * self.labor_multiplier
    }

    fn is_valid(&self) -> bool {
        self.unit_cost_aud_per_sqm.is_finite()
            && self.unit_cost_aud_per_sqm > 0.0
            && self.labor_multiplier.is_finite()
            && self.labor_multiplier > 0.0
    }
}

/// Prices for one material across all three grades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradePrices {
    pub economy: PriceEntry,
    pub standard: PriceEntry,
    pub premium: PriceEntry,
}

impl GradePrices {
    pub fn get(&self, grade: MaterialGrade) -> PriceEntry {
        match grade {
            MaterialGrade::Economy => self.economy,
            MaterialGrade::Standard => self.standard,
            MaterialGrade::Premium => self.premium,
        }
    }

    /// Both unit cost and labor multiplier never decrease from economy to premium.
    pub fn is_monotone(&self) -> bool {
        let tiers = [self.economy, self.standard, self.premium];
        tiers.windows(2).all(|pair| {
            pair[0].unit_cost_aud_per_sqm <= pair[1].unit_cost_aud_per_sqm
                && pair[0].labor_multiplier <= pair[1].labor_multiplier
        })
    }
}

/// Pricing view for a single material, as served by the pricing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialPricing {
    pub material_type: String,
    pub grade: MaterialGrade,
    pub unit_cost_aud_per_sqm: f64,
    pub labor_multiplier: f64,
    pub labor_cost_per_sqm: f64,
    /// True when the material was unknown and the default entry was used.
    pub is_default: bool,
}

/// Static lookup of prices per (material type, grade).
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct PriceTable {
    materials: HashMap<String, GradePrices>,
}

/// Material keys are matched case-insensitively, with spaces and hyphens
/// treated as underscores ("Stainless Steel" == "stainless_steel").
pub fn normalize_material_key(material_type: &str) -> String {
    material_type
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

impl PriceTable {
    /// Build a table from explicit prices, rejecting non-positive or
    /// non-monotone entries.
    pub fn new<I, K>(materials: I) -> Result<Self, EstimateError>
    where
        I: IntoIterator<Item = (K, GradePrices)>,
        K: AsRef<str>,
    {
        let table = Self {
            materials: materials
                .into_iter()
                .map(|(name, prices)| (normalize_material_key(name.as_ref()), prices))
                .collect(),
        };
        table.validate()?;
        Ok(table)
    }

    /// The reference price table for kitchen renovation materials.
    pub fn reference() -> Self {
        let rows: [(&str, [(f64, f64); 3]); 6] = [
            ("wood", [(180.0, 1.2), (280.0, 1.3), (450.0, 1.5)]),
            ("granite", [(350.0, 1.5), (550.0, 1.6), (850.0, 1.8)]),
            ("tile", [(85.0, 1.1), (125.0, 1.2), (185.0, 1.4)]),
            ("stainless_steel", [(120.0, 1.3), (180.0, 1.4), (280.0, 1.6)]),
            ("laminate", [(65.0, 1.0), (95.0, 1.1), (145.0, 1.2)]),
            ("vinyl", [(45.0, 1.0), (75.0, 1.1), (115.0, 1.2)]),
        ];

        let materials = rows
            .into_iter()
            .map(|(name, [economy, standard, premium])| {
                (
                    name.to_string(),
                    GradePrices {
                        economy: PriceEntry::new(economy.0, economy.1),
                        standard: PriceEntry::new(standard.0, standard.1),
                        premium: PriceEntry::new(premium.0, premium.1),
                    },
                )
            })
            .collect();

        Self { materials }
    }

    /// Check every entry is positive and monotone by grade.
    pub fn validate(&self) -> Result<(), EstimateError> {
        for (name, prices) in &self.materials {
            if !MaterialGrade::ALL.iter().all(|g| prices.get(*g).is_valid()) {
                return Err(EstimateError::invalid(format!(
                    "price entries for '{}' must be positive",
                    name
                )));
            }
            if !prices.is_monotone() {
                return Err(EstimateError::invalid(format!(
                    "prices for '{}' must not decrease from economy to premium",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn is_known(&self, material_type: &str) -> bool {
        self.materials
            .contains_key(&normalize_material_key(material_type))
    }

    /// Price entry for a material at a grade. Unknown materials resolve to
    /// [`PriceEntry::DEFAULT`].
    pub fn lookup(&self, material_type: &str, grade: MaterialGrade) -> PriceEntry {
        match self.materials.get(&normalize_material_key(material_type)) {
            Some(prices) => prices.get(grade),
            None => {
                tracing::warn!(
                    material_type = material_type,
                    grade = %grade,
                    "Unknown material, using default price entry"
                );
                PriceEntry::DEFAULT
            }
        }
    }

    pub fn describe(&self, material_type: &str, grade: MaterialGrade) -> MaterialPricing {
        let entry = self.lookup(material_type, grade);
        MaterialPricing {
            material_type: normalize_material_key(material_type),
            grade,
            unit_cost_aud_per_sqm: entry.unit_cost_aud_per_sqm,
            labor_multiplier: entry.labor_multiplier,
            labor_cost_per_sqm: entry.labor_cost_per_sqm(),
            is_default: !self.is_known(material_type),
        }
    }

    /// Known material keys, sorted.
    pub fn material_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.materials.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::reference()
    }
}
