#![forbid(unsafe_code)]

//! Acceptance checks for tracked rewrites.
//!
//! A rewrite is accepted only when it is semantically equivalent to its input
//! and the estimated cost improves by at least the context's
//! `performance_threshold` percent. Projection equivalence compares the sets
//! of included dotted paths; query equivalence additionally compares source,
//! limit, sort keys, full join clauses and the filter tree up to the order of
//! `and`/`or` children.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analyze::analyze;
use crate::context::OptimizationContext;
use crate::cost::{estimate, CostEstimate};
use crate::descriptor::{Descriptor, QueryDescriptor};
use crate::ledger::OptimizationStep;
use crate::types::{CostModelError, ValidationError};

/// How strictly field sets must match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquivalencePolicy {
    /// Included path sets must be identical.
    #[default]
    Strict,
    /// Also accepts rewrites whose only change is the removal of fields
    /// listed in `metadata.field_selection.pruned`.
    AllowDocumentedPruning,
}

/// Why a step was accepted or rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictReason {
    /// Equivalent and cheap enough.
    Accepted {
        /// Cost reduction in percent.
        improvement_percent: f64,
    },
    /// Output paths differ.
    SemanticMismatch {
        /// Paths present before and missing after.
        missing: Vec<String>,
        /// Paths introduced by the rewrite.
        added: Vec<String>,
    },
    /// Equivalent but below the performance threshold.
    InsufficientImprovement {
        /// Cost reduction in percent, possibly negative.
        improvement_percent: f64,
        /// Required reduction in percent.
        threshold: f64,
    },
    /// The original cost was zero, so no relative improvement exists.
    ZeroBaselineCost,
    /// The external cost model failed or timed out.
    CostModelFailed {
        /// Failure description.
        message: String,
    },
    /// The rewrite broke a structural invariant of its input type.
    InvalidRewrite {
        /// Validation failure.
        message: String,
    },
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictReason::Accepted {
                improvement_percent,
            } => write!(f, "accepted ({improvement_percent:.2}% cheaper)"),
            VerdictReason::SemanticMismatch { missing, added } => write!(
                f,
                "semantic mismatch (missing: [{}], added: [{}])",
                missing.join(", "),
                added.join(", ")
            ),
            VerdictReason::InsufficientImprovement {
                improvement_percent,
                threshold,
            } => write!(
                f,
                "improvement {improvement_percent:.2}% below threshold {threshold:.2}%"
            ),
            VerdictReason::ZeroBaselineCost => f.write_str("original cost is zero"),
            VerdictReason::CostModelFailed { message } => {
                write!(f, "cost model failed: {message}")
            }
            VerdictReason::InvalidRewrite { message } => {
                write!(f, "rewrite failed validation: {message}")
            }
        }
    }
}

/// Outcome of verifying one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the transformed value may be committed.
    pub accepted: bool,
    /// Explanation.
    pub reason: VerdictReason,
}

impl Verdict {
    fn accept(improvement_percent: f64) -> Self {
        Self {
            accepted: true,
            reason: VerdictReason::Accepted {
                improvement_percent,
            },
        }
    }

    /// A rejection with the given reason.
    pub fn reject(reason: VerdictReason) -> Self {
        Self {
            accepted: false,
            reason,
        }
    }

    /// Rejection for a failed external cost estimate.
    pub fn cost_model_failed(err: &CostModelError) -> Self {
        Self::reject(VerdictReason::CostModelFailed {
            message: err.to_string(),
        })
    }

    /// Rejection for a rewrite that does not validate.
    pub fn invalid_rewrite(err: &ValidationError) -> Self {
        Self::reject(VerdictReason::InvalidRewrite {
            message: err.to_string(),
        })
    }
}

/// Checks equivalence and cost improvement.
#[derive(Clone, Copy, Debug, Default)]
pub struct Verifier {
    policy: EquivalencePolicy,
}

impl Verifier {
    /// Creates a verifier with the given equivalence policy.
    pub fn new(policy: EquivalencePolicy) -> Self {
        Self { policy }
    }

    /// Configured equivalence policy.
    pub fn policy(&self) -> EquivalencePolicy {
        self.policy
    }

    /// Verifies a tracked projection step.
    pub fn verify(&self, step: &OptimizationStep<Descriptor>) -> Verdict {
        self.verify_projection(&step.original, &step.transformed, &step.context)
    }

    /// Verifies a projection rewrite against the local cost model.
    pub fn verify_projection(
        &self,
        original: &Descriptor,
        transformed: &Descriptor,
        ctx: &OptimizationContext,
    ) -> Verdict {
        if let Err(err) = transformed.validate() {
            return Verdict::invalid_rewrite(&err);
        }
        let before = analyze(original, ctx);
        let after = analyze(transformed, ctx);
        let pruned = transformed
            .metadata()
            .field_selection
            .as_ref()
            .map(|report| report.pruned.as_slice())
            .unwrap_or_default();
        if let Some(mismatch) = self.path_mismatch(
            &before.fields.included_paths,
            &after.fields.included_paths,
            pruned,
        ) {
            return Verdict::reject(mismatch);
        }
        judge_costs(&estimate(&before, ctx), &estimate(&after, ctx), ctx)
    }

    /// Verifies a query rewrite using externally supplied cost estimates.
    pub fn verify_query(
        &self,
        original: &QueryDescriptor,
        transformed: &QueryDescriptor,
        before: &CostEstimate,
        after: &CostEstimate,
        ctx: &OptimizationContext,
    ) -> Verdict {
        if let Err(err) = transformed.validate() {
            return Verdict::invalid_rewrite(&err);
        }
        if let Some(mismatch) = query_mismatch(original, transformed) {
            return Verdict::reject(mismatch);
        }
        match (&original.projection, &transformed.projection) {
            (Some(lhs), Some(rhs)) => {
                let pruned = rhs
                    .metadata()
                    .field_selection
                    .as_ref()
                    .map(|report| report.pruned.as_slice())
                    .unwrap_or_default();
                if let Some(mismatch) = self.path_mismatch(
                    &analyze(lhs, ctx).fields.included_paths,
                    &analyze(rhs, ctx).fields.included_paths,
                    pruned,
                ) {
                    return Verdict::reject(mismatch);
                }
            }
            (None, None) => {}
            (lhs, rhs) => {
                return Verdict::reject(VerdictReason::SemanticMismatch {
                    missing: section_label(lhs.is_some() && rhs.is_none()),
                    added: section_label(lhs.is_none() && rhs.is_some()),
                })
            }
        }
        judge_costs(before, after, ctx)
    }

    fn path_mismatch(
        &self,
        before: &BTreeSet<String>,
        after: &BTreeSet<String>,
        pruned: &[String],
    ) -> Option<VerdictReason> {
        let missing: Vec<String> = before.difference(after).cloned().collect();
        let added: Vec<String> = after.difference(before).cloned().collect();
        if missing.is_empty() && added.is_empty() {
            return None;
        }
        let documented = self.policy == EquivalencePolicy::AllowDocumentedPruning
            && added.is_empty()
            && missing.iter().all(|path| is_pruned(path, pruned));
        if documented {
            None
        } else {
            Some(VerdictReason::SemanticMismatch { missing, added })
        }
    }
}

/// Applies the performance rule to a pair of estimates.
pub fn judge_costs(
    before: &CostEstimate,
    after: &CostEstimate,
    ctx: &OptimizationContext,
) -> Verdict {
    let Some(improvement_percent) = before.improvement_percent(after) else {
        return Verdict::reject(VerdictReason::ZeroBaselineCost);
    };
    if improvement_percent >= ctx.performance_threshold {
        Verdict::accept(improvement_percent)
    } else {
        Verdict::reject(VerdictReason::InsufficientImprovement {
            improvement_percent,
            threshold: ctx.performance_threshold,
        })
    }
}

fn is_pruned(path: &str, pruned: &[String]) -> bool {
    pruned.iter().any(|name| {
        path == name
            || path
                .strip_prefix(name.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

fn section_label(present: bool) -> Vec<String> {
    if present {
        vec!["projection".to_string()]
    } else {
        Vec::new()
    }
}

fn query_mismatch(original: &QueryDescriptor, transformed: &QueryDescriptor) -> Option<VerdictReason> {
    let mut missing = Vec::new();
    let mut added = Vec::new();
    if original.source != transformed.source {
        missing.push(format!("source:{}", original.source));
        added.push(format!("source:{}", transformed.source));
    }
    if original.limit != transformed.limit {
        missing.push(format!("limit:{:?}", original.limit));
        added.push(format!("limit:{:?}", transformed.limit));
    }
    if original.sort != transformed.sort {
        missing.extend(original.sort.iter().map(|key| format!("sort:{}", key.field)));
        added.extend(transformed.sort.iter().map(|key| format!("sort:{}", key.field)));
    }
    let (before_joins, after_joins) = (original.join_signatures(), transformed.join_signatures());
    missing.extend(
        before_joins
            .difference(&after_joins)
            .map(|join| format!("join:{join}")),
    );
    added.extend(
        after_joins
            .difference(&before_joins)
            .map(|join| format!("join:{join}")),
    );
    let (before_filter, after_filter) = (original.canonical_filter(), transformed.canonical_filter());
    if before_filter != after_filter {
        missing.extend(before_filter.map(|filter| format!("filter:{filter}")));
        added.extend(after_filter.map(|filter| format!("filter:{filter}")));
    }
    if missing.is_empty() && added.is_empty() {
        None
    } else {
        Some(VerdictReason::SemanticMismatch { missing, added })
    }
}
