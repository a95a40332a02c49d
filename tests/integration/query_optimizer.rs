use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use reverify::descriptor::{CompareOp, FilterExpr, JoinKind, JoinSpec, SortDirection};
use reverify::strategy::{
    FilterStrategy, IndexStrategy, JoinStrategy, LazyLoadingStrategy, ProjectionRewriteStrategy,
    ProjectionStrategy, QueryStrategy,
};
use reverify::{
    CancellationToken, CostEstimate, CostModelError, Descriptor, OptimizationContext,
    OptimizerError, ProjectionCostModel, QueryCostModel, QueryDescriptor, QueryOptimizer,
    StrategyOutcome, ValidationError, VerdictReason,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("reverify=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

const TIMEOUT: Duration = Duration::from_millis(200);

/// Index hints make the query cheaper; every call is counted.
#[derive(Default)]
struct HintAwareModel {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryCostModel for HintAwareModel {
    async fn estimate_query_cost(
        &self,
        query: &QueryDescriptor,
        _ctx: &OptimizationContext,
    ) -> Result<CostEstimate, CostModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let retrieval = if query.metadata.index_hints.is_empty() {
            10.0
        } else {
            4.0
        };
        Ok(CostEstimate::new(retrieval, 1.0, 1.0))
    }
}

struct SlowModel;

#[async_trait]
impl QueryCostModel for SlowModel {
    async fn estimate_query_cost(
        &self,
        _query: &QueryDescriptor,
        _ctx: &OptimizationContext,
    ) -> Result<CostEstimate, CostModelError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(CostEstimate::new(1.0, 1.0, 1.0))
    }
}

struct BrokenModel;

#[async_trait]
impl QueryCostModel for BrokenModel {
    async fn estimate_query_cost(
        &self,
        _query: &QueryDescriptor,
        _ctx: &OptimizationContext,
    ) -> Result<CostEstimate, CostModelError> {
        Err(CostModelError::Failed("statistics unavailable".into()))
    }
}

fn orders() -> QueryDescriptor {
    QueryDescriptor::new("orders")
        .with_filter(FilterExpr::And(vec![
            FilterExpr::compare("status", CompareOp::Eq, json!("open")),
            FilterExpr::compare("total", CompareOp::Gt, json!(100)),
        ]))
        .with_sort("createdAt", SortDirection::Desc)
        .with_limit(25)
}

fn index_hint() -> IndexStrategy {
    IndexStrategy::new().with_rewrite(|query, _| {
        let mut hinted = query.clone();
        hinted.metadata.index_hints.push("orders_status_idx".into());
        StrategyOutcome::Applied(hinted)
    })
}

fn drop_total_predicate() -> FilterStrategy {
    FilterStrategy::new().with_rewrite(|query, _| {
        let mut narrowed = query.clone();
        narrowed.filter = Some(FilterExpr::compare("status", CompareOp::Eq, json!("open")));
        StrategyOutcome::Applied(narrowed)
    })
}

fn customers_join() -> JoinSpec {
    JoinSpec {
        target: "customers".into(),
        alias: None,
        local_field: "customerId".into(),
        foreign_field: "id".into(),
        kind: JoinKind::Inner,
    }
}

/// Marks a rewrite with an index hint so `HintAwareModel` prices it lower.
fn hinted(mut query: QueryDescriptor) -> StrategyOutcome<QueryDescriptor> {
    query.metadata.index_hints.push("orders_status_idx".into());
    StrategyOutcome::Applied(query)
}

async fn run_single(
    strategy: Box<dyn QueryStrategy>,
    query: QueryDescriptor,
) -> reverify::OptimizationOutcome<QueryDescriptor> {
    let optimizer = QueryOptimizer::builder()
        .cost_model(Arc::new(HintAwareModel::default()))
        .strategies(vec![strategy])
        .build();
    optimizer
        .optimize(query, &OptimizationContext::default(), TIMEOUT)
        .await
        .expect("valid query")
}

#[tokio::test]
async fn reordered_filters_are_equivalent() {
    let reorder = FilterStrategy::new().with_rewrite(|query, _| {
        let mut reordered = query.clone();
        if let Some(FilterExpr::And(children)) = &mut reordered.filter {
            children.reverse();
        }
        hinted(reordered)
    });
    let outcome = run_single(Box::new(reorder), orders()).await;
    assert_eq!(outcome.accepted_steps, vec!["filter".to_string()]);
}

#[tokio::test]
async fn changed_comparison_operators_are_rejected() {
    init_tracing();
    let negate = FilterStrategy::new().with_rewrite(|query, _| {
        let mut negated = query.clone();
        negated.filter = Some(FilterExpr::And(vec![
            FilterExpr::compare("status", CompareOp::Ne, json!("open")),
            FilterExpr::compare("total", CompareOp::Gt, json!(100)),
        ]));
        hinted(negated)
    });
    let outcome = run_single(Box::new(negate), orders()).await;
    assert!(outcome.accepted_steps.is_empty());
    assert_eq!(outcome.rejected_steps, vec!["filter".to_string()]);
    assert_eq!(outcome.optimized.filter, orders().filter);
}

#[tokio::test]
async fn changed_join_kind_or_keys_are_rejected() {
    init_tracing();
    let rejoin = JoinStrategy::new().with_rewrite(|query, _| {
        let mut rejoined = query.clone();
        for join in &mut rejoined.joins {
            join.kind = JoinKind::Left;
            join.local_field = "other".into();
        }
        hinted(rejoined)
    });
    let query = orders().with_join(customers_join());
    let outcome = run_single(Box::new(rejoin), query).await;
    assert!(outcome.accepted_steps.is_empty());
    assert_eq!(outcome.optimized.joins, vec![customers_join()]);
}

#[tokio::test]
async fn rewrites_that_break_validation_are_rejected() {
    let duplicate = JoinStrategy::new().with_rewrite(|query, _| {
        let mut broken = query.clone();
        broken.joins.push(JoinSpec {
            target: "accounts".into(),
            alias: Some("customers".into()),
            local_field: "accountId".into(),
            foreign_field: "id".into(),
            kind: JoinKind::Left,
        });
        hinted(broken)
    });
    let query = orders().with_join(customers_join());
    let outcome = run_single(Box::new(duplicate), query.clone()).await;
    assert_eq!(outcome.optimized, query);
    assert_eq!(outcome.rejected_steps, vec!["join".to_string()]);
    assert!(outcome.optimized.validate().is_ok());
}

#[tokio::test]
async fn missing_cost_model_fails_before_any_work() {
    let optimizer = QueryOptimizer::default();
    let err = optimizer
        .optimize(orders(), &OptimizationContext::default(), TIMEOUT)
        .await
        .expect_err("no cost model");
    assert!(matches!(err, OptimizerError::Configuration(_)));
    assert_eq!(optimizer.ledger().run_count(), 0);
    assert!(optimizer.history().is_empty());
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let optimizer = QueryOptimizer::new(ProjectionCostModel);
    let err = optimizer
        .optimize(QueryDescriptor::new(""), &OptimizationContext::default(), TIMEOUT)
        .await
        .expect_err("empty source");
    assert_eq!(err, OptimizerError::Validation(ValidationError::EmptySource));
}

#[tokio::test]
async fn cheaper_equivalent_rewrites_are_committed() {
    init_tracing();
    let model = Arc::new(HintAwareModel::default());
    let optimizer = QueryOptimizer::builder()
        .cost_model(model.clone())
        .strategies(vec![Box::new(index_hint()), Box::new(drop_total_predicate())])
        .build();
    let outcome = optimizer
        .optimize(orders(), &OptimizationContext::default(), TIMEOUT)
        .await
        .expect("valid query");

    assert_eq!(outcome.accepted_steps, vec!["index".to_string()]);
    assert_eq!(outcome.rejected_steps, vec!["filter".to_string()]);
    assert_eq!(outcome.optimized.metadata.index_hints, vec!["orders_status_idx".to_string()]);
    assert_eq!(outcome.optimized.metadata.applied_rewrites, vec!["index".to_string()]);
    assert_eq!(outcome.optimized.filter_fields(), orders().filter_fields());

    let steps = optimizer.ledger().steps(outcome.run_id);
    assert_eq!(steps.len(), 2);
    assert!(matches!(
        steps[1].verdict.as_ref().map(|v| &v.reason),
        Some(VerdictReason::SemanticMismatch { .. })
    ));
    // Baseline, index rewrite, filter rewrite; the committed cost is reused.
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn slow_cost_model_rejects_the_step_and_the_run_completes() {
    init_tracing();
    let optimizer = QueryOptimizer::builder()
        .cost_model(Arc::new(SlowModel))
        .strategies(vec![Box::new(index_hint())])
        .build();
    let outcome = optimizer
        .optimize(orders(), &OptimizationContext::default(), Duration::from_millis(20))
        .await
        .expect("timeouts are absorbed");
    assert_eq!(outcome.optimized, orders());
    assert_eq!(outcome.rejected_steps, vec!["index".to_string()]);
    let step = &optimizer.ledger().steps(outcome.run_id)[0];
    assert!(step.rolled_back);
    assert_eq!(
        step.verdict.as_ref().map(|v| v.reason.clone()),
        Some(VerdictReason::CostModelFailed {
            message: "cost model timed out after 20 ms".into()
        })
    );
}

#[tokio::test]
async fn failing_cost_model_rejects_the_step() {
    let optimizer = QueryOptimizer::builder()
        .cost_model(Arc::new(BrokenModel))
        .strategies(vec![Box::new(index_hint())])
        .build();
    let outcome = optimizer
        .optimize(orders(), &OptimizationContext::default(), TIMEOUT)
        .await
        .expect("failures are absorbed");
    assert!(outcome.accepted_steps.is_empty());
    assert_eq!(outcome.rejected_steps, vec!["index".to_string()]);
}

#[tokio::test]
async fn projection_rewrites_are_costed_locally() {
    init_tracing();
    let rewrite = ProjectionRewriteStrategy::new().with_rewrite(|query, ctx| {
        let Some(projection) = &query.projection else {
            return StrategyOutcome::NotApplicable;
        };
        match LazyLoadingStrategy.apply(projection, ctx) {
            StrategyOutcome::Applied(lazy) => {
                let mut rewritten = query.clone();
                rewritten.projection = Some(lazy);
                StrategyOutcome::Applied(rewritten)
            }
            StrategyOutcome::NotApplicable => StrategyOutcome::NotApplicable,
            StrategyOutcome::Failed(err) => StrategyOutcome::Failed(err),
        }
    });
    assert_eq!(rewrite.name(), "projection");

    let optimizer = QueryOptimizer::builder()
        .cost_model(Arc::new(ProjectionCostModel))
        .strategies(vec![Box::new(rewrite)])
        .build();
    let fields: Vec<String> = (0..12).map(|i| format!("f{i:02}")).collect();
    let query = orders().with_projection(Descriptor::including(fields));
    let ctx = OptimizationContext::default().with_lazy_loading(true);
    let outcome = optimizer.optimize(query, &ctx, TIMEOUT).await.expect("valid");

    assert_eq!(outcome.accepted_steps, vec!["projection".to_string()]);
    let projection = outcome.optimized.projection.as_ref().expect("projection");
    let plan = projection.metadata().lazy_loading.as_ref().expect("plan");
    assert_eq!(plan.lazy_fields.len(), 2);
    let entry = optimizer.history().latest().expect("entry");
    assert_eq!(entry.analysis.sort_count, 1);
    assert_eq!(entry.analysis.output_paths().len(), 12);
}

#[tokio::test]
async fn cancelled_runs_stop_between_strategies() {
    let optimizer = QueryOptimizer::builder()
        .cost_model(Arc::new(HintAwareModel::default()))
        .strategies(vec![Box::new(index_hint())])
        .build();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = optimizer
        .optimize_with_cancel(orders(), &OptimizationContext::default(), TIMEOUT, &cancel)
        .await
        .expect("valid");
    assert!(outcome.cancelled);
    assert_eq!(outcome.optimized, orders());
    assert!(optimizer.ledger().run(outcome.run_id).is_some_and(|run| run.cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_query_runs_get_distinct_ids() {
    let optimizer = Arc::new(
        QueryOptimizer::builder()
            .cost_model(Arc::new(HintAwareModel::default()))
            .strategies(vec![Box::new(index_hint())])
            .build(),
    );
    let mut handles = Vec::new();
    for _ in 0..8 {
        let optimizer = Arc::clone(&optimizer);
        handles.push(tokio::spawn(async move {
            optimizer
                .optimize(orders(), &OptimizationContext::default(), TIMEOUT)
                .await
                .expect("valid")
        }));
    }
    let mut runs = Vec::new();
    for handle in handles {
        let outcome = handle.await.expect("task");
        assert_eq!(outcome.accepted_steps, vec!["index".to_string()]);
        runs.push(outcome.run_id);
    }
    runs.sort();
    runs.dedup();
    assert_eq!(runs.len(), 8);
    assert_eq!(optimizer.history().len(), 8);
}
