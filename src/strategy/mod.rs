#![forbid(unsafe_code)]

//! Rewrite strategies.
//!
//! A strategy maps a descriptor and context to an outcome. It must be pure:
//! returning [`StrategyOutcome::NotApplicable`] (or an unchanged descriptor)
//! is the normal way to decline. Optimizers own an ordered list of boxed
//! strategies built at construction time.

use crate::context::OptimizationContext;
use crate::descriptor::{Descriptor, QueryDescriptor};
use crate::types::StrategyError;

mod field_selection;
mod lazy_loading;
mod pushdown;
mod query;
mod ranking;

pub use field_selection::{FieldSelectionMode, FieldSelectionStrategy};
pub use lazy_loading::{LazyLoadingStrategy, EAGER_SHARE_THRESHOLD};
pub use pushdown::PushdownStrategy;
pub use query::{
    FilterStrategy, IndexStrategy, JoinStrategy, ProjectionRewriteStrategy, QueryRewrite,
    SortStrategy,
};
pub use ranking::{priority_score, rank_fields};

/// Result of applying a strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum StrategyOutcome<T> {
    /// The strategy produced a rewrite.
    Applied(T),
    /// The strategy's preconditions did not hold.
    NotApplicable,
    /// The strategy failed; the optimizer treats this as a no-op.
    Failed(StrategyError),
}

impl<T> StrategyOutcome<T> {
    /// True for [`StrategyOutcome::Applied`].
    pub fn is_applied(&self) -> bool {
        matches!(self, StrategyOutcome::Applied(_))
    }

    /// Returns the rewrite, if any.
    pub fn applied(self) -> Option<T> {
        match self {
            StrategyOutcome::Applied(value) => Some(value),
            _ => None,
        }
    }
}

/// Rewrite rule over projection descriptors.
pub trait ProjectionStrategy: Send + Sync {
    /// Stable name used in steps, history and logs.
    fn name(&self) -> &str;
    /// Computes the rewrite of `descriptor`.
    fn apply(&self, descriptor: &Descriptor, ctx: &OptimizationContext)
        -> StrategyOutcome<Descriptor>;
}

/// Rewrite rule over structured queries.
pub trait QueryStrategy: Send + Sync {
    /// Stable name used in steps, history and logs.
    fn name(&self) -> &str;
    /// Computes the rewrite of `query`.
    fn apply(
        &self,
        query: &QueryDescriptor,
        ctx: &OptimizationContext,
    ) -> StrategyOutcome<QueryDescriptor>;
}

/// Projection strategies in their default order.
pub fn default_projection_strategies() -> Vec<Box<dyn ProjectionStrategy>> {
    projection_strategies(FieldSelectionMode::default())
}

/// Default projection pipeline with the given field selection mode.
pub fn projection_strategies(mode: FieldSelectionMode) -> Vec<Box<dyn ProjectionStrategy>> {
    vec![
        Box::new(FieldSelectionStrategy::new(mode)),
        Box::new(PushdownStrategy),
        Box::new(LazyLoadingStrategy),
    ]
}

/// Query strategies in their default order.
pub fn default_query_strategies() -> Vec<Box<dyn QueryStrategy>> {
    vec![
        Box::new(IndexStrategy::new()),
        Box::new(FilterStrategy::new()),
        Box::new(JoinStrategy::new()),
        Box::new(SortStrategy::new()),
        Box::new(ProjectionRewriteStrategy::new()),
    ]
}
