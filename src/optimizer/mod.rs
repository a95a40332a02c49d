#![forbid(unsafe_code)]

//! Orchestration of analyze, rewrite, verify and commit.
//!
//! Both optimizers run their strategies in registration order against a
//! working value. A non-identity rewrite is tracked in the ledger and
//! verified; accepted rewrites become the new working value, rejected ones
//! are rolled back. Every call appends one history entry.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use crate::strategy::StrategyOutcome;
use crate::types::{RunId, StrategyError};

mod projection;
mod query;

pub use projection::{ProjectionOptimizer, ProjectionOptimizerBuilder};
pub use query::{ProjectionCostModel, QueryCostModel, QueryOptimizer, QueryOptimizerBuilder};

/// Result of one `optimize` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizationOutcome<T> {
    /// Committed value; always equivalent to the input.
    pub optimized: T,
    /// Ledger run backing the call.
    pub run_id: RunId,
    /// Position of the call in the optimizer's history.
    pub history_index: usize,
    /// Strategies whose rewrites were committed.
    pub accepted_steps: Vec<String>,
    /// Strategies whose rewrites were rolled back.
    pub rejected_steps: Vec<String>,
    /// Whether the call stopped early on cancellation.
    pub cancelled: bool,
}

/// Runs a strategy, converting a panic into [`StrategyOutcome::Failed`].
fn apply_guarded<T>(name: &str, apply: impl FnOnce() -> StrategyOutcome<T>) -> StrategyOutcome<T> {
    catch_unwind(AssertUnwindSafe(apply)).unwrap_or_else(|payload| {
        StrategyOutcome::Failed(StrategyError::new(name, panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
