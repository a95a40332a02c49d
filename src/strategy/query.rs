//! Built-in query strategies.
//!
//! None of them rewrites anything on its own; each forwards to an optional
//! caller-supplied hook and records its name in `applied_rewrites` when the
//! hook changes the query.

use std::fmt;
use std::sync::Arc;

use super::{QueryStrategy, StrategyOutcome};
use crate::context::OptimizationContext;
use crate::descriptor::QueryDescriptor;

/// Caller-supplied rewrite used by a built-in query strategy.
pub type QueryRewrite = Arc<
    dyn Fn(&QueryDescriptor, &OptimizationContext) -> StrategyOutcome<QueryDescriptor>
        + Send
        + Sync,
>;

fn run_hook(
    name: &str,
    hook: Option<&QueryRewrite>,
    query: &QueryDescriptor,
    ctx: &OptimizationContext,
) -> StrategyOutcome<QueryDescriptor> {
    let Some(hook) = hook else {
        return StrategyOutcome::NotApplicable;
    };
    match hook(query, ctx) {
        StrategyOutcome::Applied(mut rewritten) if rewritten != *query => {
            if !rewritten.metadata.applied_rewrites.iter().any(|n| n == name) {
                rewritten.metadata.applied_rewrites.push(name.to_string());
            }
            StrategyOutcome::Applied(rewritten)
        }
        StrategyOutcome::Applied(_) => StrategyOutcome::NotApplicable,
        other => other,
    }
}

macro_rules! hooked_strategy {
    ($(#[$doc:meta])* $ty:ident, $name:literal) => {
        $(#[$doc])*
        #[derive(Clone, Default)]
        pub struct $ty {
            rewrite: Option<QueryRewrite>,
        }

        impl $ty {
            /// Creates the pass-through strategy.
            pub fn new() -> Self {
                Self::default()
            }

            /// Installs a rewrite hook.
            pub fn with_rewrite<F>(mut self, rewrite: F) -> Self
            where
                F: Fn(&QueryDescriptor, &OptimizationContext) -> StrategyOutcome<QueryDescriptor>
                    + Send
                    + Sync
                    + 'static,
            {
                self.rewrite = Some(Arc::new(rewrite));
                self
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("hooked", &self.rewrite.is_some())
                    .finish()
            }
        }

        impl QueryStrategy for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn apply(
                &self,
                query: &QueryDescriptor,
                ctx: &OptimizationContext,
            ) -> StrategyOutcome<QueryDescriptor> {
                run_hook($name, self.rewrite.as_ref(), query, ctx)
            }
        }
    };
}

hooked_strategy!(
    /// Index selection, typically writing `metadata.index_hints`.
    IndexStrategy,
    "index"
);
hooked_strategy!(
    /// Filter rewriting such as predicate reordering.
    FilterStrategy,
    "filter"
);
hooked_strategy!(
    /// Join reordering or elimination.
    JoinStrategy,
    "join"
);
hooked_strategy!(
    /// Sort elimination or index-backed ordering.
    SortStrategy,
    "sort"
);
hooked_strategy!(
    /// Rewrites of the projection section.
    ProjectionRewriteStrategy,
    "projection"
);
