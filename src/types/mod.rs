#![forbid(unsafe_code)]

//! Identifiers and the error taxonomy shared by every pipeline stage.

use std::fmt;

use serde::{Deserialize, Serialize};

mod error;

pub use error::{
    CostModelError, OptimizerError, OptimizerErrorWithCode, Result, StrategyError,
    ValidationError, ValidationResult,
};

/// Identifier of one orchestrator invocation inside a ledger.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// Identifier of one tracked strategy application inside a ledger.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct StepId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step-{}", self.0)
    }
}

impl From<RunId> for u64 {
    fn from(value: RunId) -> Self {
        value.0
    }
}

impl From<StepId> for u64 {
    fn from(value: StepId) -> Self {
        value.0
    }
}
