//! Kitchen analysis payload returned by the analysis agent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::estimate::MaterialLineItem;

/// Object detected in the kitchen image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KitchenMeasurements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_kitchen_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabinet_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countertop_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flooring_area: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KitchenAnalysis {
    #[serde(default)]
    pub detected_objects: Vec<DetectedObject>,
    #[serde(
        default,
        alias = "materials_data",
        deserialize_with = "materials_or_encoded"
    )]
    pub materials: Vec<MaterialLineItem>,
    #[serde(default)]
    pub measurements: KitchenMeasurements,
}

/// Some agents double-encode the materials list as a JSON string.
fn materials_or_encoded<'de, D>(deserializer: D) -> Result<Vec<MaterialLineItem>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(encoded) => serde_json::from_str(&encoded).map_err(serde::de::Error::custom),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}

/// Material set used when the analysis step cannot produce one.
pub fn default_materials() -> Vec<MaterialLineItem> {
    vec![
        MaterialLineItem::new("wood", 14.0, "cabinet"),
        MaterialLineItem::new("granite", 7.5, "countertop"),
        MaterialLineItem::new("tile", 18.5, "flooring"),
    ]
}

impl KitchenAnalysis {
    pub fn from_map(data: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(data))
    }

    /// Analysis built around [`default_materials`], with no detections.
    pub fn fallback() -> Self {
        let materials = default_materials();
        let measurements = KitchenMeasurements {
            total_kitchen_area: Some(40.0),
            cabinet_area: Some(14.0),
            countertop_area: Some(7.5),
            flooring_area: Some(18.5),
        };
        Self {
            detected_objects: Vec::new(),
            materials,
            measurements,
        }
    }

    /// Kitchen area from measurements, else the summed material area.
    pub fn kitchen_area(&self) -> f64 {
        match self.measurements.total_kitchen_area {
            Some(area) if area > 0.0 => area,
            _ => self.materials.iter().map(|m| m.area_sqm).sum(),
        }
    }

    /// Cabinet area from measurements, else the area of materials located at cabinets.
    pub fn cabinet_area(&self) -> f64 {
        match self.measurements.cabinet_area {
            Some(area) => area,
            None => self
                .materials
                .iter()
                .filter(|m| m.location.to_lowercase().contains("cabinet"))
                .map(|m| m.area_sqm)
                .sum(),
        }
    }

    pub fn material_area(&self, material_type: &str) -> f64 {
        let key = super::pricing::normalize_material_key(material_type);
        self.materials
            .iter()
            .filter(|m| super::pricing::normalize_material_key(&m.material_type) == key)
            .map(|m| m.area_sqm)
            .sum()
    }
}
