#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Structured errors raised while validating a descriptor or query.
///
/// Validation always runs before analysis. Any of these aborts the whole
/// `optimize` call; no partially rewritten descriptor is ever returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field name was empty or whitespace-only.
    #[error("field name cannot be empty (at '{path}')")]
    EmptyFieldName { path: String },
    /// A field was excluded but still carried a nested descriptor.
    #[error("field '{field}' is excluded but declares a nested projection")]
    ExcludedNested { field: String },
    /// Nested projections exceed the depth limit.
    #[error("projection nesting exceeds depth {max} at '{path}'")]
    NestingTooDeep { path: String, max: usize },
    /// A raw projection entry had an unsupported JSON type.
    #[error("field '{field}' has unsupported projection value {found}")]
    InvalidFieldValue { field: String, found: String },
    /// The raw projection was neither an object nor a list of names.
    #[error("projection must be an object or an array of field names (got {found})")]
    InvalidProjection { found: String },
    /// A raw query document did not match the query shape.
    #[error("query document is malformed: {message}")]
    InvalidQuery { message: String },
    /// A query did not name its source collection.
    #[error("query source cannot be empty")]
    EmptySource,
    /// A join clause did not name its target.
    #[error("join #{index} has an empty target")]
    EmptyJoinTarget { index: usize },
    /// Two join clauses share an alias.
    #[error("duplicate join alias '{alias}'")]
    DuplicateJoinAlias { alias: String },
    /// A sort key did not name a field.
    #[error("sort key #{index} has an empty field")]
    EmptySortField { index: usize },
    /// Filter tree nesting exceeds the depth limit.
    #[error("filter tree exceeds depth {max}")]
    FilterTooDeep { max: usize },
    /// An `and`/`or` group had no children.
    #[error("filter {group} group requires at least one child")]
    EmptyFilterGroup { group: &'static str },
}

impl ValidationError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmptyFieldName { .. } => "EmptyFieldName",
            ValidationError::ExcludedNested { .. } => "ExcludedNested",
            ValidationError::NestingTooDeep { .. } => "NestingTooDeep",
            ValidationError::InvalidFieldValue { .. } => "InvalidFieldValue",
            ValidationError::InvalidProjection { .. } => "InvalidProjection",
            ValidationError::InvalidQuery { .. } => "InvalidQuery",
            ValidationError::EmptySource => "EmptySource",
            ValidationError::EmptyJoinTarget { .. } => "EmptyJoinTarget",
            ValidationError::DuplicateJoinAlias { .. } => "DuplicateJoinAlias",
            ValidationError::EmptySortField { .. } => "EmptySortField",
            ValidationError::FilterTooDeep { .. } => "FilterTooDeep",
            ValidationError::EmptyFilterGroup { .. } => "EmptyFilterGroup",
        }
    }
}

/// Convenience alias for validation results.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Failure reported by a strategy's `apply`.
///
/// The orchestrator logs these and treats the strategy as a no-op for the
/// current run; they never reach the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("strategy '{strategy}' failed: {message}")]
pub struct StrategyError {
    /// Name of the failing strategy.
    pub strategy: String,
    /// Human-readable failure description.
    pub message: String,
}

impl StrategyError {
    /// Builds an error for the named strategy.
    pub fn new(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            message: message.into(),
        }
    }
}

/// Failure of an external query cost model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CostModelError {
    /// The estimate did not complete within the caller-supplied timeout.
    #[error("cost model timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// The cost model reported an error.
    #[error("cost model failed: {0}")]
    Failed(String),
}

/// Errors surfaced to callers of `optimize`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    /// The input descriptor or query was malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A required collaborator or setting is missing.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OptimizerError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizerError::Validation(err) => err.code(),
            OptimizerError::Configuration(_) => "Configuration",
        }
    }

    pub(crate) fn missing_collaborator(what: &str) -> Self {
        OptimizerError::Configuration(format!("{what} is not configured"))
    }
}

/// Formats optimizer errors together with their codes.
pub struct OptimizerErrorWithCode<'a>(pub &'a OptimizerError);

impl fmt::Display for OptimizerErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

/// Result alias for optimizer entry points.
pub type Result<T> = std::result::Result<T, OptimizerError>;
