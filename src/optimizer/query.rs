use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{apply_guarded, OptimizationOutcome};
use crate::analyze::{analyze_query, QueryAnalysis};
use crate::context::OptimizationContext;
use crate::cost::{estimate_projection_cost, CostEstimate};
use crate::descriptor::QueryDescriptor;
use crate::history::{HistoryEntry, OptimizationHistory};
use crate::ledger::RollbackLedger;
use crate::strategy::{default_query_strategies, QueryStrategy, StrategyOutcome};
use crate::types::{CostModelError, OptimizerError, Result};
use crate::verify::{EquivalencePolicy, Verdict, Verifier};

/// External cost estimator for structured queries.
#[async_trait]
pub trait QueryCostModel: Send + Sync {
    /// Estimates the cost of executing `query`.
    async fn estimate_query_cost(
        &self,
        query: &QueryDescriptor,
        ctx: &OptimizationContext,
    ) -> std::result::Result<CostEstimate, CostModelError>;
}

/// Cost model backed by the local projection estimator.
///
/// Costs the query's projection (or a single whole-document field when
/// there is none) and multiplies it by `1 + joins`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectionCostModel;

#[async_trait]
impl QueryCostModel for ProjectionCostModel {
    async fn estimate_query_cost(
        &self,
        query: &QueryDescriptor,
        ctx: &OptimizationContext,
    ) -> std::result::Result<CostEstimate, CostModelError> {
        let base = match &query.projection {
            Some(projection) => estimate_projection_cost(projection, ctx),
            None => CostEstimate::new(
                ctx.base_field_cost * ctx.data_source_cost_factor,
                ctx.base_processing_cost,
                ctx.base_memory_cost,
            ),
        };
        Ok(base.scaled(1.0 + query.joins.len() as f64))
    }
}

/// Rewrite-and-verify optimizer for structured queries.
///
/// Verification costs come from a [`QueryCostModel`]; each estimate is
/// bounded by the timeout passed to [`QueryOptimizer::optimize`].
pub struct QueryOptimizer {
    strategies: Vec<Box<dyn QueryStrategy>>,
    cost_model: Option<Arc<dyn QueryCostModel>>,
    verifier: Verifier,
    ledger: RollbackLedger<QueryDescriptor>,
    history: OptimizationHistory<QueryDescriptor, QueryAnalysis>,
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl QueryOptimizer {
    /// Optimizer with the default strategies and the given cost model.
    pub fn new(cost_model: impl QueryCostModel + 'static) -> Self {
        Self::builder().cost_model(Arc::new(cost_model)).build()
    }

    /// Starts a builder.
    pub fn builder() -> QueryOptimizerBuilder {
        QueryOptimizerBuilder::default()
    }

    /// Names of the registered strategies in execution order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Audit trail of every call.
    pub fn history(&self) -> &OptimizationHistory<QueryDescriptor, QueryAnalysis> {
        &self.history
    }

    /// Run and step records.
    pub fn ledger(&self) -> &RollbackLedger<QueryDescriptor> {
        &self.ledger
    }

    /// Optimizes `query`; every cost estimate must finish within `timeout`.
    pub async fn optimize(
        &self,
        query: QueryDescriptor,
        ctx: &OptimizationContext,
        timeout: Duration,
    ) -> Result<OptimizationOutcome<QueryDescriptor>> {
        self.optimize_with_cancel(query, ctx, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`QueryOptimizer::optimize`], stopping between strategies once
    /// `cancel` fires.
    pub async fn optimize_with_cancel(
        &self,
        query: QueryDescriptor,
        ctx: &OptimizationContext,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<OptimizationOutcome<QueryDescriptor>> {
        let cost_model = self
            .cost_model
            .clone()
            .ok_or_else(|| OptimizerError::missing_collaborator("query cost model"))?;
        query.validate()?;
        let analysis = analyze_query(&query, ctx);
        let shared_ctx = Arc::new(ctx.clone());
        let run_id = self.ledger.start_run();
        info!(
            run_id = run_id.0,
            fingerprint = query.fingerprint(),
            source = %query.source,
            joins = analysis.join_count,
            strategies = self.strategies.len(),
            timeout_ms = duration_ms(timeout),
            "optimizer.run.start"
        );

        let mut current = Arc::new(query.clone());
        let mut current_cost: Option<CostEstimate> = None;
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

            let (verdict, after_cost) = if let Err(err) = transformed.validate() {
                (Verdict::invalid_rewrite(&err), None)
            } else {
                let before = match current_cost {
                    Some(cost) => Ok(cost),
                    None => bounded_estimate(cost_model.as_ref(), &current, ctx, timeout).await,
                };
                let after = match before {
                    Ok(_) => bounded_estimate(cost_model.as_ref(), &transformed, ctx, timeout).await,
                    Err(_) => Err(CostModelError::Failed("baseline estimate unavailable".into())),
                };
                match (before, after) {
                    (Ok(before), Ok(after)) => {
                        current_cost = Some(before);
                        let verdict = self
                            .verifier
                            .verify_query(&current, &transformed, &before, &after, ctx);
                        (verdict, Some(after))
                    }
                    (Err(err), _) | (_, Err(err)) => {
                        warn!(run_id = run_id.0, strategy = name, error = %err, "optimizer.cost_model.failed");
                        (Verdict::cost_model_failed(&err), None)
                    }
                }
            };
            self.ledger.record_verdict(step_id, verdict.clone());

            if verdict.accepted {
                info!(
                    run_id = run_id.0,
                    step_id = step_id.0,
                    strategy = name,
                    reason = %verdict.reason,
                    "optimizer.step.accepted"
                );
                accepted_steps.push(name.to_string());
                current = transformed;
                current_cost = after_cost;
            } else {
                info!(
                    run_id = run_id.0,
                    step_id = step_id.0,
                    strategy = name,
                    reason = %verdict.reason,
                    "optimizer.step.rejected"
                );
                rejected_steps.push(name.to_string());
            }
        }

        self.ledger.end_run(run_id);
        let optimized = Arc::try_unwrap(current).unwrap_or_else(|shared| (*shared).clone());
        let history_index = self.history.append(HistoryEntry {
            original: query,
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

async fn bounded_estimate(
    model: &dyn QueryCostModel,
    query: &QueryDescriptor,
    ctx: &OptimizationContext,
    timeout: Duration,
) -> std::result::Result<CostEstimate, CostModelError> {
    match tokio::time::timeout(timeout, model.estimate_query_cost(query, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(CostModelError::Timeout {
            timeout_ms: duration_ms(timeout),
        }),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`QueryOptimizer`].
#[derive(Default)]
pub struct QueryOptimizerBuilder {
    strategies: Option<Vec<Box<dyn QueryStrategy>>>,
    extra: Vec<Box<dyn QueryStrategy>>,
    cost_model: Option<Arc<dyn QueryCostModel>>,
    equivalence: EquivalencePolicy,
}

impl QueryOptimizerBuilder {
    /// Replaces the default pipeline.
    pub fn strategies(mut self, strategies: Vec<Box<dyn QueryStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Appends a strategy after the pipeline.
    pub fn strategy(mut self, strategy: impl QueryStrategy + 'static) -> Self {
        self.extra.push(Box::new(strategy));
        self
    }

    /// Sets the cost model used for verification.
    pub fn cost_model(mut self, model: Arc<dyn QueryCostModel>) -> Self {
        self.cost_model = Some(model);
        self
    }

    /// Equivalence policy applied to the projection section.
    pub fn equivalence(mut self, policy: EquivalencePolicy) -> Self {
        self.equivalence = policy;
        self
    }

    /// Builds the optimizer.
    pub fn build(self) -> QueryOptimizer {
        let mut strategies = self.strategies.unwrap_or_else(default_query_strategies);
        strategies.extend(self.extra);
        QueryOptimizer {
            strategies,
            cost_model: self.cost_model,
            verifier: Verifier::new(self.equivalence),
            ledger: RollbackLedger::new(),
            history: OptimizationHistory::new(),
        }
    }
}
