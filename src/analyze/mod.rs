#![forbid(unsafe_code)]

//! Structural analysis of descriptors.
//!
//! [`analyze`] is a pure function of the descriptor and context. It assumes
//! the descriptor already passed [`Descriptor::validate`]; the optimizers
//! guarantee that ordering.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::context::OptimizationContext;
use crate::descriptor::{join_path, Descriptor};

mod query;

pub use query::{analyze_query, QueryAnalysis};

/// Included-field count above which field selection is considered.
pub const FIELD_SELECTION_THRESHOLD: usize = 10;
/// Complexity score above which pushdown is considered.
pub const PUSHDOWN_COMPLEXITY_THRESHOLD: f64 = 10.0;

/// Coarse complexity bucket derived from the score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// Score below 5.
    Simple,
    /// Score below 20.
    Moderate,
    /// Score below 50.
    Complex,
    /// Everything else.
    VeryComplex,
}

impl ComplexityLevel {
    /// Buckets a complexity score.
    pub fn from_score(score: f64) -> Self {
        if score < 5.0 {
            ComplexityLevel::Simple
        } else if score < 20.0 {
            ComplexityLevel::Moderate
        } else if score < 50.0 {
            ComplexityLevel::Complex
        } else {
            ComplexityLevel::VeryComplex
        }
    }
}

/// Field inventory of the top level, plus every included path.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldSummary {
    /// Every declared top-level field.
    pub all_fields: Vec<String>,
    /// Included top-level fields.
    pub included_fields: Vec<String>,
    /// Excluded top-level fields.
    pub excluded_fields: Vec<String>,
    /// Included top-level fields with a nested projection.
    pub nested_fields: Vec<String>,
    /// Included top-level fields annotated lazy.
    pub lazy_fields: Vec<String>,
    /// Included top-level fields annotated source-evaluated.
    pub source_evaluated_fields: Vec<String>,
    /// Dotted paths of every included field at any depth.
    pub included_paths: BTreeSet<String>,
}

impl FieldSummary {
    /// Number of included top-level fields.
    pub fn included_count(&self) -> usize {
        self.included_fields.len()
    }

    /// Number of excluded top-level fields.
    pub fn excluded_count(&self) -> usize {
        self.excluded_fields.len()
    }

    /// Number of nested top-level fields.
    pub fn nested_count(&self) -> usize {
        self.nested_fields.len()
    }

    /// Number of lazy top-level fields.
    pub fn lazy_count(&self) -> usize {
        self.lazy_fields.len()
    }

    /// Number of source-evaluated top-level fields.
    pub fn source_evaluated_count(&self) -> usize {
        self.source_evaluated_fields.len()
    }
}

/// Size and shape measurements.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Complexity {
    /// Included top-level fields.
    pub field_count: usize,
    /// Included top-level fields with a nested projection.
    pub nested_field_count: usize,
    /// Longest chain of nested projections below this descriptor.
    pub nested_depth: usize,
    /// `field_count` plus the totals of every nested projection.
    pub total_field_count: usize,
    /// `total_field_count * (1 + nested_depth * 0.5)`.
    pub complexity_score: f64,
    /// Bucket of `complexity_score`.
    pub complexity_level: ComplexityLevel,
}

/// Rewrite the analyzer considers worth attempting.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizationOpportunity {
    /// Many included fields; selection may narrow or flag them.
    FieldSelection {
        /// Included top-level fields.
        included_count: usize,
        /// Threshold that was exceeded.
        threshold: usize,
    },
    /// The source can evaluate a sufficiently complex projection.
    Pushdown {
        /// Complexity score that exceeded the threshold.
        complexity_score: f64,
    },
    /// More fields than the eager partition holds.
    LazyLoading {
        /// Included top-level fields.
        included_count: usize,
        /// Eager partition size.
        eager_load_limit: usize,
    },
}

impl OptimizationOpportunity {
    /// Name of the strategy that addresses this opportunity.
    pub fn strategy_name(&self) -> &'static str {
        match self {
            OptimizationOpportunity::FieldSelection { .. } => "field_selection",
            OptimizationOpportunity::Pushdown { .. } => "pushdown",
            OptimizationOpportunity::LazyLoading { .. } => "lazy_loading",
        }
    }
}

/// Derived analysis of a descriptor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analysis {
    /// Field inventory.
    pub fields: FieldSummary,
    /// Measurements.
    pub complexity: Complexity,
    /// Candidate rewrites, in pipeline order.
    pub optimization_opportunities: Vec<OptimizationOpportunity>,
}

struct Shape {
    nested_depth: usize,
    total_field_count: usize,
}

fn measure(descriptor: &Descriptor) -> Shape {
    let mut nested_depth = 0;
    let mut total_field_count = 0;
    for spec in descriptor.fields().values().filter(|spec| spec.include) {
        total_field_count += 1;
        if let Some(child) = &spec.nested {
            let shape = measure(child);
            nested_depth = nested_depth.max(1 + shape.nested_depth);
            total_field_count += shape.total_field_count;
        }
    }
    Shape {
        nested_depth,
        total_field_count,
    }
}

fn collect_paths(descriptor: &Descriptor, prefix: &str, out: &mut BTreeSet<String>) {
    for (name, spec) in descriptor.fields() {
        if !spec.include {
            continue;
        }
        let path = join_path(prefix, name);
        if let Some(child) = &spec.nested {
            collect_paths(child, &path, out);
        }
        out.insert(path);
    }
}

/// Analyzes a validated descriptor.
pub fn analyze(descriptor: &Descriptor, ctx: &OptimizationContext) -> Analysis {
    let mut fields = FieldSummary::default();
    for (name, spec) in descriptor.fields() {
        fields.all_fields.push(name.clone());
        if !spec.include {
            fields.excluded_fields.push(name.clone());
            continue;
        }
        fields.included_fields.push(name.clone());
        if spec.nested.is_some() {
            fields.nested_fields.push(name.clone());
        }
        if spec.lazy {
            fields.lazy_fields.push(name.clone());
        }
        if spec.source_evaluated {
            fields.source_evaluated_fields.push(name.clone());
        }
    }
    collect_paths(descriptor, "", &mut fields.included_paths);

    let shape = measure(descriptor);
    let complexity_score = shape.total_field_count as f64 * (1.0 + shape.nested_depth as f64 * 0.5);
    let complexity = Complexity {
        field_count: fields.included_count(),
        nested_field_count: fields.nested_count(),
        nested_depth: shape.nested_depth,
        total_field_count: shape.total_field_count,
        complexity_score,
        complexity_level: ComplexityLevel::from_score(complexity_score),
    };

    let mut optimization_opportunities = Vec::new();
    if fields.included_count() > FIELD_SELECTION_THRESHOLD {
        optimization_opportunities.push(OptimizationOpportunity::FieldSelection {
            included_count: fields.included_count(),
            threshold: FIELD_SELECTION_THRESHOLD,
        });
    }
    if ctx.supports_projection_pushdown && complexity_score > PUSHDOWN_COMPLEXITY_THRESHOLD {
        optimization_opportunities.push(OptimizationOpportunity::Pushdown { complexity_score });
    }
    if ctx.supports_lazy_loading && fields.included_count() > ctx.eager_load_limit {
        optimization_opportunities.push(OptimizationOpportunity::LazyLoading {
            included_count: fields.included_count(),
            eager_load_limit: ctx.eager_load_limit,
        });
    }

    Analysis {
        fields,
        complexity,
        optimization_opportunities,
    }
}
