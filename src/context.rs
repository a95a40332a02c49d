#![forbid(unsafe_code)]

//! Optimization context: the recognized per-call options.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default cost per retrieved field.
pub const DEFAULT_BASE_FIELD_COST: f64 = 1.0;
/// Default processing cost per complexity unit.
pub const DEFAULT_BASE_PROCESSING_COST: f64 = 0.5;
/// Default memory cost per field.
pub const DEFAULT_BASE_MEMORY_COST: f64 = 0.2;
/// Default multiplier applied to retrieval cost.
pub const DEFAULT_DATA_SOURCE_COST_FACTOR: f64 = 1.0;
/// Default minimum improvement, in percent, for a step to be accepted.
pub const DEFAULT_PERFORMANCE_THRESHOLD: f64 = 5.0;
/// Default size of the eager partition built by lazy loading.
pub const DEFAULT_EAGER_LOAD_LIMIT: usize = 10;

/// Access statistics for one field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldStatistics {
    /// Relative access frequency.
    pub access_frequency: f64,
    /// Average stored size in bytes.
    pub average_size: f64,
    /// Whether the data source indexes the field.
    pub indexed: bool,
}

/// Options recognized by analysis, costing, strategies and verification.
///
/// Built once per call and shared by reference; nothing in the pipeline
/// mutates it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationContext {
    /// Whether the data source can evaluate projections itself. Default `false`.
    pub supports_projection_pushdown: bool,
    /// Whether deferred field fetches are available. Default `false`.
    pub supports_lazy_loading: bool,
    /// Cost per retrieved field. Default `1.0`.
    pub base_field_cost: f64,
    /// Cost per complexity unit. Default `0.5`.
    pub base_processing_cost: f64,
    /// Cost per field held in memory. Default `0.2`.
    pub base_memory_cost: f64,
    /// Multiplier for retrieval cost. Default `1.0`.
    pub data_source_cost_factor: f64,
    /// Estimated byte size per field. Default empty.
    pub field_sizes: HashMap<String, u64>,
    /// Access statistics per field. Default empty.
    pub field_statistics: HashMap<String, FieldStatistics>,
    /// Minimum cost improvement in percent. Default `5.0`.
    pub performance_threshold: f64,
    /// Eager partition size for lazy loading. Default `10`.
    pub eager_load_limit: usize,
}

impl Default for OptimizationContext {
    fn default() -> Self {
        Self {
            supports_projection_pushdown: false,
            supports_lazy_loading: false,
            base_field_cost: DEFAULT_BASE_FIELD_COST,
            base_processing_cost: DEFAULT_BASE_PROCESSING_COST,
            base_memory_cost: DEFAULT_BASE_MEMORY_COST,
            data_source_cost_factor: DEFAULT_DATA_SOURCE_COST_FACTOR,
            field_sizes: HashMap::new(),
            field_statistics: HashMap::new(),
            performance_threshold: DEFAULT_PERFORMANCE_THRESHOLD,
            eager_load_limit: DEFAULT_EAGER_LOAD_LIMIT,
        }
    }
}

impl OptimizationContext {
    /// Enables or disables projection pushdown.
    pub fn with_projection_pushdown(mut self, enabled: bool) -> Self {
        self.supports_projection_pushdown = enabled;
        self
    }

    /// Enables or disables lazy loading.
    pub fn with_lazy_loading(mut self, enabled: bool) -> Self {
        self.supports_lazy_loading = enabled;
        self
    }

    /// Sets the acceptance threshold in percent.
    pub fn with_performance_threshold(mut self, percent: f64) -> Self {
        self.performance_threshold = percent;
        self
    }

    /// Sets the eager partition size.
    pub fn with_eager_load_limit(mut self, limit: usize) -> Self {
        self.eager_load_limit = limit;
        self
    }

    /// Sets the retrieval multiplier.
    pub fn with_data_source_cost_factor(mut self, factor: f64) -> Self {
        self.data_source_cost_factor = factor;
        self
    }

    /// Records an estimated byte size for a field.
    pub fn with_field_size(mut self, field: impl Into<String>, bytes: u64) -> Self {
        self.field_sizes.insert(field.into(), bytes);
        self
    }

    /// Records access statistics for a field.
    pub fn with_field_statistics(mut self, field: impl Into<String>, stats: FieldStatistics) -> Self {
        self.field_statistics.insert(field.into(), stats);
        self
    }
}
