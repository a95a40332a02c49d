use std::collections::BTreeMap;
use std::sync::Once;

use proptest::prelude::*;
use reverify::strategy::FieldSelectionMode;
use reverify::{
    analyze, estimate_projection_cost, to_descriptor, CostEstimate, Descriptor, EquivalencePolicy,
    FieldSpec, OptimizationContext, ProjectionOptimizer, VerdictReason, Verifier,
};
use serde_json::{json, Value};
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

fn article_fields() -> Vec<&'static str> {
    vec![
        "id", "title", "status", "createdAt", "viewCount", "summary", "authorId", "slug",
        "locale", "tags", "body", "coverImage",
    ]
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn wide_projection_is_lazily_loaded() {
    init_tracing();
    let optimizer = ProjectionOptimizer::new();
    let ctx = OptimizationContext::default()
        .with_lazy_loading(true)
        .with_performance_threshold(5.0);
    let outcome = optimizer
        .optimize(article_fields(), &ctx)
        .expect("valid projection");

    assert_eq!(outcome.accepted_steps, vec!["lazy_loading".to_string()]);
    // Flagging alone changes no cost, so it cannot clear the threshold.
    assert_eq!(outcome.rejected_steps, vec!["field_selection".to_string()]);

    let plan = outcome
        .optimized
        .metadata()
        .lazy_loading
        .as_ref()
        .expect("lazy loading plan");
    assert!(plan.enabled);
    assert_eq!(plan.eager_fields.len(), 10);
    assert_eq!(plan.lazy_fields.len(), 2);

    // 12 fields: 12 + 6 + 2.4 before, 10 + 6 + 2.0 after.
    let before = estimate_projection_cost(&to_descriptor(article_fields()).expect("valid"), &ctx);
    let after = estimate_projection_cost(&outcome.optimized, &ctx);
    assert_close(before.total_cost, 20.4);
    assert_close(after.total_cost, 18.0);

    let entry = optimizer
        .history()
        .get(outcome.history_index)
        .expect("history entry");
    assert_eq!(entry.run_id, outcome.run_id);
    assert_eq!(entry.analysis.fields.included_count(), 12);
    assert_eq!(entry.accepted_steps, outcome.accepted_steps);
}

#[test]
fn narrow_projection_is_returned_unchanged() {
    init_tracing();
    let optimizer = ProjectionOptimizer::new();
    let input = json!({"id": true, "title": true, "body": true});
    let contexts = [
        OptimizationContext::default(),
        OptimizationContext::default()
            .with_lazy_loading(true)
            .with_projection_pushdown(true),
    ];
    for ctx in &contexts {
        let outcome = optimizer.optimize(&input, ctx).expect("valid projection");
        assert_eq!(outcome.optimized, to_descriptor(&input).expect("valid"));
        assert!(outcome.accepted_steps.is_empty());
        assert!(outcome.rejected_steps.is_empty());
        assert!(optimizer.ledger().steps(outcome.run_id).is_empty());
    }
    assert_eq!(optimizer.history().len(), 2);
}

#[test]
fn cost_arithmetic_matches_the_formulas() {
    let descriptor = to_descriptor(json!({
        "a": true, "b": true, "c": true, "d": true,
        "author": {"name": true}
    }))
    .expect("valid");
    let ctx = OptimizationContext::default();
    let analysis = analyze(&descriptor, &ctx);
    assert_eq!(analysis.fields.included_count(), 5);
    assert_eq!(analysis.complexity.nested_field_count, 1);

    let cost = estimate_projection_cost(&descriptor, &ctx);
    assert_close(cost.retrieval_cost, 5.0 * 1.0 + 1.0 * 1.0 * 1.5);
    assert_close(
        cost.processing_cost,
        analysis.complexity.complexity_score * 0.5 + analysis.complexity.nested_depth as f64 * 0.5 * 2.0,
    );
    assert_close(cost.processing_cost, 5.5);
    assert_close(cost.memory_cost, 6.0 * 0.2 + 1.0 * 0.2 * 1.5);
    assert_close(
        cost.total_cost,
        cost.retrieval_cost + cost.processing_cost + cost.memory_cost,
    );
}

#[test]
fn zero_baseline_cost_is_rejected() {
    let zero = CostEstimate::default();
    let verdict =
        reverify::verify::judge_costs(&zero, &zero, &OptimizationContext::default());
    assert!(!verdict.accepted);
    assert_eq!(verdict.reason, VerdictReason::ZeroBaselineCost);

    let ctx = OptimizationContext {
        base_field_cost: 0.0,
        base_processing_cost: 0.0,
        base_memory_cost: 0.0,
        ..OptimizationContext::default()
    };
    let descriptor = Descriptor::including(["a", "b"]);
    let verdict = Verifier::default().verify_projection(&descriptor, &descriptor, &ctx);
    assert_eq!(verdict.reason, VerdictReason::ZeroBaselineCost);
}

#[test]
fn second_pass_changes_nothing() {
    init_tracing();
    let optimizer = ProjectionOptimizer::new();
    let ctx = OptimizationContext::default()
        .with_lazy_loading(true)
        .with_projection_pushdown(true);
    let first = optimizer.optimize(article_fields(), &ctx).expect("valid");
    let second = optimizer
        .optimize(first.optimized.clone(), &ctx)
        .expect("valid");
    assert_eq!(second.optimized, first.optimized);
    assert!(second.accepted_steps.is_empty());
}

#[test]
fn pushdown_and_lazy_loading_compose() {
    init_tracing();
    let optimizer = ProjectionOptimizer::new();
    let ctx = OptimizationContext::default()
        .with_lazy_loading(true)
        .with_projection_pushdown(true);
    let outcome = optimizer.optimize(article_fields(), &ctx).expect("valid");
    assert_eq!(
        outcome.accepted_steps,
        vec!["pushdown".to_string(), "lazy_loading".to_string()]
    );
    let optimized = &outcome.optimized;
    assert!(optimized
        .included_names()
        .all(|name| optimized.field(name).is_some_and(|spec| spec.source_evaluated)));
    assert_close(estimate_projection_cost(optimized, &ctx).total_cost, 15.0);

    let steps = optimizer.ledger().steps(outcome.run_id);
    let names: Vec<&str> = steps.iter().map(|s| s.strategy_name.as_str()).collect();
    assert_eq!(names, vec!["field_selection", "pushdown", "lazy_loading"]);
    assert!(steps[0].rolled_back);
    assert!(!steps[1].rolled_back && !steps[2].rolled_back);
    assert_eq!(*steps[2].original, *steps[1].transformed);
}

#[test]
fn pruning_requires_the_documented_policy() {
    init_tracing();
    let ctx = OptimizationContext::default();
    let strict = ProjectionOptimizer::builder()
        .field_selection(FieldSelectionMode::Prune { keep: 4 })
        .build();
    let outcome = strict.optimize(article_fields(), &ctx).expect("valid");
    assert_eq!(outcome.optimized.len(), 12);
    assert_eq!(outcome.rejected_steps, vec!["field_selection".to_string()]);
    let step = &strict.ledger().steps(outcome.run_id)[0];
    assert!(matches!(
        step.verdict.as_ref().map(|v| &v.reason),
        Some(VerdictReason::SemanticMismatch { .. })
    ));

    let relaxed = ProjectionOptimizer::builder()
        .field_selection(FieldSelectionMode::Prune { keep: 4 })
        .equivalence(EquivalencePolicy::AllowDocumentedPruning)
        .build();
    let outcome = relaxed.optimize(article_fields(), &ctx).expect("valid");
    assert_eq!(outcome.accepted_steps, vec!["field_selection".to_string()]);
    assert_eq!(outcome.optimized.len(), 4);
    let report = outcome
        .optimized
        .metadata()
        .field_selection
        .as_ref()
        .expect("report");
    assert_eq!(report.pruned.len(), 8);
    for kept in ["authorId", "id", "title", "status"] {
        assert!(outcome.optimized.field(kept).is_some(), "{kept} kept");
    }
}

#[test]
fn nested_projections_survive_optimization() {
    init_tracing();
    let mut raw = serde_json::Map::new();
    for i in 0..11 {
        raw.insert(format!("f{i:02}"), Value::Bool(true));
    }
    raw.insert("author".into(), json!({"name": true, "address": {"city": true}}));
    let input = Value::Object(raw);
    let ctx = OptimizationContext::default().with_lazy_loading(true);
    let outcome = ProjectionOptimizer::new().optimize(&input, &ctx).expect("valid");
    let original = to_descriptor(&input).expect("valid");
    assert_eq!(
        analyze(&outcome.optimized, &ctx).fields.included_paths,
        analyze(&original, &ctx).fields.included_paths
    );
    let author = outcome.optimized.field("author").expect("author kept");
    assert_eq!(
        author.original(),
        FieldSpec::nested(
            to_descriptor(json!({"name": true, "address": {"city": true}}))
                .expect("valid")
                .with_kind(reverify::descriptor::DescriptorKind::Nested)
        )
    );
}

fn arb_flags() -> impl Strategy<Value = BTreeMap<String, bool>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<bool>(), 0..=24)
}

fn raw_projection(flags: &BTreeMap<String, bool>) -> Value {
    Value::Object(
        flags
            .iter()
            .map(|(name, include)| (name.clone(), Value::Bool(*include)))
            .collect(),
    )
}

proptest! {
    #[test]
    fn prop_construction_is_idempotent(flags in arb_flags()) {
        let once = to_descriptor(raw_projection(&flags)).expect("valid");
        let twice = to_descriptor(&once).expect("valid");
        prop_assert_eq!(&once, &twice);
        let round_trip: Descriptor =
            serde_json::from_value(serde_json::to_value(&once).expect("serialize")).expect("deserialize");
        prop_assert_eq!(once, round_trip);
    }

    #[test]
    fn prop_costs_are_never_negative(
        flags in arb_flags(),
        field in -10.0f64..10.0,
        processing in -10.0f64..10.0,
        memory in -10.0f64..10.0,
        factor in -5.0f64..5.0,
    ) {
        let descriptor = to_descriptor(raw_projection(&flags)).expect("valid");
        let ctx = OptimizationContext {
            base_field_cost: field,
            base_processing_cost: processing,
            base_memory_cost: memory,
            data_source_cost_factor: factor,
            ..OptimizationContext::default()
        };
        let cost = estimate_projection_cost(&descriptor, &ctx);
        prop_assert!(cost.retrieval_cost >= 0.0);
        prop_assert!(cost.processing_cost >= 0.0);
        prop_assert!(cost.memory_cost >= 0.0);
        prop_assert!((cost.total_cost - (cost.retrieval_cost + cost.processing_cost + cost.memory_cost)).abs() < 1e-9);
    }

    #[test]
    fn prop_optimization_preserves_fields_and_never_costs_more(
        flags in arb_flags(),
        lazy in any::<bool>(),
        pushdown in any::<bool>(),
        eager_limit in 0usize..16,
    ) {
        let ctx = OptimizationContext::default()
            .with_lazy_loading(lazy)
            .with_projection_pushdown(pushdown)
            .with_eager_load_limit(eager_limit);
        let original = to_descriptor(raw_projection(&flags)).expect("valid");
        let outcome = ProjectionOptimizer::new().optimize(&original, &ctx).expect("valid");
        prop_assert_eq!(
            analyze(&outcome.optimized, &ctx).fields.included_paths,
            analyze(&original, &ctx).fields.included_paths
        );
        let before = estimate_projection_cost(&original, &ctx).total_cost;
        let after = estimate_projection_cost(&outcome.optimized, &ctx).total_cost;
        prop_assert!(after <= before + 1e-9);
    }
}
