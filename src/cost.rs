#![forbid(unsafe_code)]

//! Local cost model for projections.
//!
//! Costs are unitless. With un-annotated descriptors the model reduces to
//!
//! ```text
//! retrieval  = (included * field + nested * field * 1.5) * source_factor
//! processing = score * proc + depth * proc * 2
//! memory     = total_fields * mem + depth * mem * 1.5
//! ```
//!
//! Lazy fields are left out of retrieval and memory because they are not
//! fetched with the primary read, and source-evaluated fields discount
//! processing proportionally.

use serde::{Deserialize, Serialize};

use crate::analyze::{analyze, Analysis};
use crate::context::OptimizationContext;
use crate::descriptor::Descriptor;

/// Retrieval surcharge per nested field.
pub const NESTED_RETRIEVAL_SURCHARGE: f64 = 1.5;
/// Processing surcharge per unit of nesting depth.
pub const DEPTH_PROCESSING_SURCHARGE: f64 = 2.0;
/// Memory surcharge per unit of nesting depth.
pub const DEPTH_MEMORY_SURCHARGE: f64 = 1.5;
/// Share of processing saved when every included field is source-evaluated.
pub const PUSHDOWN_PROCESSING_DISCOUNT: f64 = 0.5;

/// Three-part cost estimate. `total_cost` is always the sum of the parts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Cost of fetching fields from the source.
    pub retrieval_cost: f64,
    /// Cost of evaluating the projection.
    pub processing_cost: f64,
    /// Cost of holding the result in memory.
    pub memory_cost: f64,
    /// Sum of the three parts.
    pub total_cost: f64,
}

impl CostEstimate {
    /// Builds an estimate, clamping negative or non-finite parts to zero.
    pub fn new(retrieval_cost: f64, processing_cost: f64, memory_cost: f64) -> Self {
        let retrieval_cost = non_negative(retrieval_cost);
        let processing_cost = non_negative(processing_cost);
        let memory_cost = non_negative(memory_cost);
        Self {
            retrieval_cost,
            processing_cost,
            memory_cost,
            total_cost: retrieval_cost + processing_cost + memory_cost,
        }
    }

    /// Percentage by which `after` is cheaper than `self`.
    ///
    /// Returns `None` when `self` has a zero total, where the ratio is
    /// undefined.
    pub fn improvement_percent(&self, after: &CostEstimate) -> Option<f64> {
        if self.total_cost <= 0.0 {
            return None;
        }
        Some((self.total_cost - after.total_cost) / self.total_cost * 100.0)
    }

    /// Multiplies every part by `factor`.
    pub fn scaled(&self, factor: f64) -> CostEstimate {
        CostEstimate::new(
            self.retrieval_cost * factor,
            self.processing_cost * factor,
            self.memory_cost * factor,
        )
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Estimates the cost of an analyzed descriptor.
pub fn estimate(analysis: &Analysis, ctx: &OptimizationContext) -> CostEstimate {
    let field_cost = non_negative(ctx.base_field_cost);
    let processing = non_negative(ctx.base_processing_cost);
    let memory = non_negative(ctx.base_memory_cost);
    let source_factor = non_negative(ctx.data_source_cost_factor);

    let included = analysis.fields.included_count();
    let lazy = analysis.fields.lazy_count().min(included);
    let nested = analysis.complexity.nested_field_count as f64;
    let depth = analysis.complexity.nested_depth as f64;
    let eager = (included - lazy) as f64;

    let retrieval_cost =
        (eager * field_cost + nested * field_cost * NESTED_RETRIEVAL_SURCHARGE) * source_factor;

    let pushed_ratio = if included == 0 {
        0.0
    } else {
        analysis.fields.source_evaluated_count() as f64 / included as f64
    };
    let processing_cost = (analysis.complexity.complexity_score * processing
        + depth * processing * DEPTH_PROCESSING_SURCHARGE)
        * (1.0 - PUSHDOWN_PROCESSING_DISCOUNT * pushed_ratio);

    let resident = analysis.complexity.total_field_count.saturating_sub(lazy) as f64;
    let memory_cost = resident * memory + depth * memory * DEPTH_MEMORY_SURCHARGE;

    CostEstimate::new(retrieval_cost, processing_cost, memory_cost)
}

/// Analyzes and estimates a descriptor in one call.
pub fn estimate_projection_cost(descriptor: &Descriptor, ctx: &OptimizationContext) -> CostEstimate {
    estimate(&analyze(descriptor, ctx), ctx)
}
