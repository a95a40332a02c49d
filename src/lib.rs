//! Rewrite-and-verify optimization for projections and structured queries.
//!
//! A descriptor is analyzed, handed to an ordered list of rewrite
//! strategies, and every non-identity rewrite is verified for semantic
//! equivalence and cost improvement before it is committed. Rejected
//! rewrites are rolled back; every call leaves an audit trail.
//!
//! ```no_run
//! use reverify::{OptimizationContext, ProjectionOptimizer};
//!
//! let optimizer = ProjectionOptimizer::new();
//! let ctx = OptimizationContext::default().with_lazy_loading(true);
//! let outcome = optimizer.optimize(["id", "title", "body"], &ctx)?;
//! println!("{:?}", outcome.accepted_steps);
//! # Ok::<(), reverify::OptimizerError>(())
//! ```

#![warn(missing_docs)]

pub mod analyze;
pub mod config;
pub mod context;
pub mod cost;
pub mod descriptor;
pub mod history;
pub mod ledger;
pub mod optimizer;
pub mod strategy;
pub mod types;
pub mod verify;

pub use analyze::{analyze, analyze_query, Analysis, QueryAnalysis};
pub use config::{default_config_path, ConfigError, OptimizerSettings};
pub use context::{FieldStatistics, OptimizationContext};
pub use cost::{estimate, estimate_projection_cost, CostEstimate};
pub use descriptor::{to_descriptor, Descriptor, FieldSpec, IntoDescriptor, QueryDescriptor};
pub use history::{HistoryEntry, OptimizationHistory};
pub use ledger::{OptimizationRun, OptimizationStep, RollbackLedger};
pub use optimizer::{
    OptimizationOutcome, ProjectionCostModel, ProjectionOptimizer, QueryCostModel, QueryOptimizer,
};
pub use strategy::{ProjectionStrategy, QueryStrategy, StrategyOutcome};
pub use types::{
    CostModelError, OptimizerError, Result, RunId, StepId, StrategyError, ValidationError,
};
pub use verify::{EquivalencePolicy, Verdict, VerdictReason, Verifier};

pub use tokio_util::sync::CancellationToken;
