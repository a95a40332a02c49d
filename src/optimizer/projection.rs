use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{apply_guarded, OptimizationOutcome};
use crate::analyze::{analyze, Analysis};
use crate::context::OptimizationContext;
use crate::descriptor::{Descriptor, IntoDescriptor};
use crate::history::{HistoryEntry, OptimizationHistory};
use crate::ledger::RollbackLedger;
use crate::strategy::{projection_strategies, FieldSelectionMode, ProjectionStrategy, StrategyOutcome};
use crate::types::Result;
use crate::verify::{EquivalencePolicy, Verifier};

/// Rewrite-and-verify optimizer for projection descriptors.
///
/// Safe to share between threads; concurrent calls get distinct runs in the
/// shared ledger and distinct history entries.
pub struct ProjectionOptimizer {
    strategies: Vec<Box<dyn ProjectionStrategy>>,
    verifier: Verifier,
    ledger: RollbackLedger<Descriptor>,
    history: OptimizationHistory<Descriptor, Analysis>,
}

impl Default for ProjectionOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionOptimizer {
    /// Optimizer with the default strategies and strict verification.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts a builder.
    pub fn builder() -> ProjectionOptimizerBuilder {
        ProjectionOptimizerBuilder::default()
    }

    /// Names of the registered strategies in execution order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Audit trail of every call.
    pub fn history(&self) -> &OptimizationHistory<Descriptor, Analysis> {
        &self.history
    }

    /// Run and step records.
    pub fn ledger(&self) -> &RollbackLedger<Descriptor> {
        &self.ledger
    }

    /// Optimizes `input`.
    ///
    /// Only validation errors are returned; strategy failures and rejected
    /// rewrites are absorbed and show up in the outcome and history.
    pub fn optimize<I: IntoDescriptor>(
        &self,
        input: I,
        ctx: &OptimizationContext,
    ) -> Result<OptimizationOutcome<Descriptor>> {
        self.optimize_with_cancel(input, ctx, &CancellationToken::new())
    }

    /// Optimizes `input`, stopping between strategies once `cancel` fires.
    ///
    /// A cancelled call returns the last committed descriptor, which has
    /// passed verification at every step.
    pub fn optimize_with_cancel<I: IntoDescriptor>(
        &self,
        input: I,
        ctx: &OptimizationContext,
        cancel: &CancellationToken,
    ) -> Result<OptimizationOutcome<Descriptor>> {
        let original = input.into_descriptor()?;
        original.validate()?;
        let analysis = analyze(&original, ctx);
        let shared_ctx = Arc::new(ctx.clone());
        let run_id = self.ledger.start_run();
        info!(
            run_id = run_id.0,
            fingerprint = original.fingerprint(),
            fields = analysis.fields.included_count(),
            complexity = analysis.complexity.complexity_score,
            strategies = self.strategies.len(),
            "optimizer.run.start"
        );

        let mut current = Arc::new(original.clone());
        let mut accepted_steps = Vec::new();
        let mut rejected_steps = Vec::new();
        let mut cancelled = false;

        for (sequence, strategy) in self.strategies.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                self.ledger.mark_cancelled(run_id);
                info!(run_id = run_id.0, sequence, "optimizer.run.cancelled");
                break;
            }
            let name = strategy.name();
            let transformed = match apply_guarded(name, || strategy.apply(&current, ctx)) {
                StrategyOutcome::Applied(rewritten) if rewritten != *current => rewritten,
                StrategyOutcome::Applied(_) | StrategyOutcome::NotApplicable => {
                    debug!(run_id = run_id.0, strategy = name, "optimizer.strategy.skipped");
                    continue;
                }
                StrategyOutcome::Failed(err) => {
                    warn!(run_id = run_id.0, strategy = name, error = %err, "optimizer.strategy.failed");
                    continue;
                }
            };

            let transformed = Arc::new(transformed);
            let step_id = self.ledger.track_step(
                run_id,
                Arc::clone(&current),
                Arc::clone(&transformed),
                name,
                Arc::clone(&shared_ctx),
                sequence,
            );
            let verdict = self
                .ledger
                .verify_and_rollback(step_id, |step| self.verifier.verify(step));
            match verdict {
                Some(verdict) if verdict.accepted => {
                    info!(
                        run_id = run_id.0,
                        step_id = step_id.0,
                        strategy = name,
                        reason = %verdict.reason,
                        "optimizer.step.accepted"
                    );
                    accepted_steps.push(name.to_string());
                    current = transformed;
                }
                verdict => {
                    let reason = verdict.map(|v| v.reason.to_string()).unwrap_or_default();
                    info!(
                        run_id = run_id.0,
                        step_id = step_id.0,
                        strategy = name,
                        reason = %reason,
                        "optimizer.step.rejected"
                    );
                    rejected_steps.push(name.to_string());
                }
            }
        }

        self.ledger.end_run(run_id);
        let optimized = Arc::try_unwrap(current).unwrap_or_else(|shared| (*shared).clone());
        let history_index = self.history.append(HistoryEntry {
            original,
            optimized: optimized.clone(),
            analysis,
            context: ctx.clone(),
            run_id,
            timestamp: time::OffsetDateTime::now_utc(),
            index: 0,
            accepted_steps: accepted_steps.clone(),
            rejected_steps: rejected_steps.clone(),
            cancelled,
        });
        info!(
            run_id = run_id.0,
            history_index,
            accepted = accepted_steps.len(),
            rejected = rejected_steps.len(),
            cancelled,
            "optimizer.run.complete"
        );
        Ok(OptimizationOutcome {
            optimized,
            run_id,
            history_index,
            accepted_steps,
            rejected_steps,
            cancelled,
        })
    }
}

/// Builder for [`ProjectionOptimizer`].
#[derive(Default)]
pub struct ProjectionOptimizerBuilder {
    strategies: Option<Vec<Box<dyn ProjectionStrategy>>>,
    extra: Vec<Box<dyn ProjectionStrategy>>,
    field_selection: FieldSelectionMode,
    equivalence: EquivalencePolicy,
}

impl ProjectionOptimizerBuilder {
    /// Replaces the default pipeline.
    pub fn strategies(mut self, strategies: Vec<Box<dyn ProjectionStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Appends a strategy after the pipeline.
    pub fn strategy(mut self, strategy: impl ProjectionStrategy + 'static) -> Self {
        self.extra.push(Box::new(strategy));
        self
    }

    /// Field selection mode used by the default pipeline.
    pub fn field_selection(mut self, mode: FieldSelectionMode) -> Self {
        self.field_selection = mode;
        self
    }

    /// Equivalence policy used during verification.
    pub fn equivalence(mut self, policy: EquivalencePolicy) -> Self {
        self.equivalence = policy;
        self
    }

    /// Builds the optimizer.
    pub fn build(self) -> ProjectionOptimizer {
        let mut strategies = self
            .strategies
            .unwrap_or_else(|| projection_strategies(self.field_selection));
        strategies.extend(self.extra);
        ProjectionOptimizer {
            strategies,
            verifier: Verifier::new(self.equivalence),
            ledger: RollbackLedger::new(),
            history: OptimizationHistory::new(),
        }
    }
}
