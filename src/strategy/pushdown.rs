use super::{ProjectionStrategy, StrategyOutcome};
use crate::analyze::{analyze, PUSHDOWN_COMPLEXITY_THRESHOLD};
use crate::context::OptimizationContext;
use crate::descriptor::{Descriptor, PushdownPlan};

/// Marks included fields for evaluation by the data source.
///
/// Only annotations change; the included field set is untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PushdownStrategy;

impl ProjectionStrategy for PushdownStrategy {
    fn name(&self) -> &str {
        "pushdown"
    }

    fn apply(
        &self,
        descriptor: &Descriptor,
        ctx: &OptimizationContext,
    ) -> StrategyOutcome<Descriptor> {
        if !ctx.supports_projection_pushdown {
            return StrategyOutcome::NotApplicable;
        }
        let analysis = analyze(descriptor, ctx);
        if analysis.complexity.complexity_score <= PUSHDOWN_COMPLEXITY_THRESHOLD {
            return StrategyOutcome::NotApplicable;
        }
        let (fields, mut metadata) = descriptor.clone().into_parts();
        let fields = fields
            .into_iter()
            .map(|(name, spec)| {
                let pushed = spec.include;
                (name, spec.with_source_evaluated(pushed))
            })
            .collect();
        metadata.pushdown = Some(PushdownPlan {
            fields: analysis.fields.included_fields,
        });
        StrategyOutcome::Applied(Descriptor::from_parts(fields, metadata))
    }
}
