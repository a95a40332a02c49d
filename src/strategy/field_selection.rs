use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ranking::rank_fields;
use super::{ProjectionStrategy, StrategyOutcome};
use crate::analyze::FIELD_SELECTION_THRESHOLD;
use crate::context::OptimizationContext;
use crate::descriptor::{Descriptor, FieldSelectionReport};

/// How field selection treats wide projections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FieldSelectionMode {
    /// Record a report without touching the field set.
    #[default]
    Flag,
    /// Keep the `keep` highest-priority included fields and drop the rest.
    ///
    /// Dropped fields are listed in the report. Strict verification rejects
    /// such rewrites; see `EquivalencePolicy::AllowDocumentedPruning`.
    Prune {
        /// Included fields to retain.
        keep: usize,
    },
}

/// Flags, or when licensed prunes, projections with many included fields.
#[derive(Clone, Debug, Default)]
pub struct FieldSelectionStrategy {
    mode: FieldSelectionMode,
}

impl FieldSelectionStrategy {
    /// Creates the strategy in the given mode.
    pub fn new(mode: FieldSelectionMode) -> Self {
        Self { mode }
    }

    /// Configured mode.
    pub fn mode(&self) -> FieldSelectionMode {
        self.mode
    }
}

impl ProjectionStrategy for FieldSelectionStrategy {
    fn name(&self) -> &str {
        "field_selection"
    }

    fn apply(
        &self,
        descriptor: &Descriptor,
        ctx: &OptimizationContext,
    ) -> StrategyOutcome<Descriptor> {
        let included: Vec<&str> = descriptor.included_names().collect();
        if included.len() <= FIELD_SELECTION_THRESHOLD {
            return StrategyOutcome::NotApplicable;
        }
        let (mut fields, mut metadata) = descriptor.clone().into_parts();
        let mut pruned: BTreeSet<String> = metadata
            .field_selection
            .as_ref()
            .map(|report| report.pruned.iter().cloned().collect())
            .unwrap_or_default();

        if let FieldSelectionMode::Prune { keep } = self.mode {
            let dropped: Vec<String> = rank_fields(included.iter().copied(), ctx)
                .into_iter()
                .skip(keep)
                .collect();
            for name in &dropped {
                fields.remove(name);
            }
            if let Some(plan) = metadata.lazy_loading.as_mut() {
                plan.eager_fields.retain(|name| !dropped.contains(name));
                plan.lazy_fields.retain(|name| !dropped.contains(name));
            }
            if let Some(plan) = metadata.pushdown.as_mut() {
                plan.fields.retain(|name| !dropped.contains(name));
            }
            pruned.extend(dropped);
        }

        metadata.field_selection = Some(FieldSelectionReport {
            included_count: included.len(),
            threshold: FIELD_SELECTION_THRESHOLD,
            pruned: pruned.into_iter().collect(),
        });
        StrategyOutcome::Applied(Descriptor::from_parts(fields, metadata))
    }
}
