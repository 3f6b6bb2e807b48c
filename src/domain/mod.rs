//! Domain types and the cost engine
//!
//! Pure, synchronous computations over in-memory values. Nothing here performs
//! I/O; agent calls live in `services`.

pub mod analysis;
pub mod comparison;
pub mod estimate;
pub mod pricing;
pub mod recommendations;

// Re-export commonly used types
pub use analysis::{default_materials, DetectedObject, KitchenAnalysis, KitchenMeasurements};
pub use comparison::{GradeComparator, GradeComparisonResult, GradeDeltas};
pub use estimate::{
    format_aud, BudgetRange, CostEstimate, CostEstimator, EstimateOptions, MaterialLineItem,
    ProjectEstimate,
};
pub use pricing::{GradePrices, MaterialGrade, MaterialPricing, PriceEntry, PriceTable};
