use std::collections::HashSet;

use super::ranking::rank_fields;
use super::{ProjectionStrategy, StrategyOutcome};
use crate::context::OptimizationContext;
use crate::descriptor::{Descriptor, LazyLoadingPlan};

/// Eager byte share below which deferring the rest is worthwhile on its own.
pub const EAGER_SHARE_THRESHOLD: f64 = 0.5;

/// Splits included fields into an eager partition and a deferred remainder.
///
/// The top `eager_load_limit` fields by priority stay eager; the others are
/// annotated `lazy`. The logical field set never changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct LazyLoadingStrategy;

impl ProjectionStrategy for LazyLoadingStrategy {
    fn name(&self) -> &str {
        "lazy_loading"
    }

    fn apply(
        &self,
        descriptor: &Descriptor,
        ctx: &OptimizationContext,
    ) -> StrategyOutcome<Descriptor> {
        if !ctx.supports_lazy_loading {
            return StrategyOutcome::NotApplicable;
        }
        let limit = ctx.eager_load_limit;
        let ranked = rank_fields(descriptor.included_names(), ctx);
        let (eager, lazy) = ranked.split_at(limit.min(ranked.len()));
        let beneficial = ranked.len() > limit
            || eager_share(eager, lazy, ctx).is_some_and(|share| share < EAGER_SHARE_THRESHOLD);
        // Nothing to defer when every included field fits the eager partition.
        if !beneficial || lazy.is_empty() {
            return StrategyOutcome::NotApplicable;
        }

        let deferred: HashSet<&str> = lazy.iter().map(String::as_str).collect();
        let (fields, mut metadata) = descriptor.clone().into_parts();
        let fields = fields
            .into_iter()
            .map(|(name, spec)| {
                let is_lazy = spec.include && deferred.contains(name.as_str());
                (name, spec.with_lazy(is_lazy))
            })
            .collect();
        metadata.lazy_loading = Some(LazyLoadingPlan {
            enabled: true,
            eager_fields: eager.to_vec(),
            lazy_fields: lazy.to_vec(),
            eager_load_limit: limit,
        });
        StrategyOutcome::Applied(Descriptor::from_parts(fields, metadata))
    }
}

/// Fraction of the known bytes held by the eager partition, when
/// `field_sizes` knows any of them.
fn eager_share(eager: &[String], lazy: &[String], ctx: &OptimizationContext) -> Option<f64> {
    if ctx.field_sizes.is_empty() {
        return None;
    }
    let size_of = |name: &String| ctx.field_sizes.get(name).copied().unwrap_or(0);
    let eager_bytes: u64 = eager.iter().map(size_of).sum();
    let total_bytes: u64 = eager_bytes + lazy.iter().map(size_of).sum::<u64>();
    (total_bytes > 0).then(|| eager_bytes as f64 / total_bytes as f64)
}
