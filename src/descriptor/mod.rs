#![forbid(unsafe_code)]

//! Canonical descriptor model.
//!
//! Raw projections and query documents are normalized into [`Descriptor`] and
//! [`QueryDescriptor`] before anything else looks at them. Both are plain
//! values: strategies produce new descriptors instead of editing old ones.

mod model;
mod normalize;

/// Structured query descriptors.
pub mod query;

pub use model::{
    Descriptor, DescriptorKind, DescriptorMetadata, FieldSelectionReport, FieldSpec,
    LazyLoadingPlan, PushdownPlan, MAX_NESTING_DEPTH,
};
pub(crate) use model::join_path;
pub use normalize::{to_descriptor, IntoDescriptor};
pub use query::{
    CompareOp, FilterExpr, JoinKind, JoinSpec, QueryDescriptor, QueryMetadata, SortDirection,
    SortKey,
};
