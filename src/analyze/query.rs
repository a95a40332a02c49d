use std::collections::BTreeSet;

use serde::Serialize;

use super::{analyze, Analysis};
use crate::context::OptimizationContext;
use crate::descriptor::QueryDescriptor;

/// Derived analysis of a structured query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryAnalysis {
    /// Primary source.
    pub source: String,
    /// Field paths read by the filter.
    pub filter_fields: BTreeSet<String>,
    /// Depth of the filter tree, 0 without a filter.
    pub filter_depth: usize,
    /// Number of sort keys.
    pub sort_count: usize,
    /// Number of joins.
    pub join_count: usize,
    /// Whether a row limit is set.
    pub limited: bool,
    /// Analysis of the projection section, if any.
    pub projection: Option<Analysis>,
}

impl QueryAnalysis {
    /// Included output paths, empty when whole documents are returned.
    pub fn output_paths(&self) -> BTreeSet<String> {
        self.projection
            .as_ref()
            .map(|analysis| analysis.fields.included_paths.clone())
            .unwrap_or_default()
    }
}

/// Analyzes a validated query.
pub fn analyze_query(query: &QueryDescriptor, ctx: &OptimizationContext) -> QueryAnalysis {
    QueryAnalysis {
        source: query.source.clone(),
        filter_fields: query.filter_fields(),
        filter_depth: query.filter.as_ref().map_or(0, |filter| filter.depth()),
        sort_count: query.sort.len(),
        join_count: query.joins.len(),
        limited: query.limit.is_some(),
        projection: query
            .projection
            .as_ref()
            .map(|projection| analyze(projection, ctx)),
    }
}
