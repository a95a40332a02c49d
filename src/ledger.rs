#![forbid(unsafe_code)]

//! Run and step bookkeeping for rollback and audit.
//!
//! The ledger owns every run and step it creates. Records live in arenas
//! (`Vec` plus an id index) behind a single mutex; ids come from atomic
//! counters so concurrent runs never collide. Rolled-back steps stay in the
//! arena for inspection until their run is pruned with
//! [`RollbackLedger::prune_finished`]; nothing else ever removes records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::context::OptimizationContext;
use crate::types::{RunId, StepId};
use crate::verify::Verdict;

/// One tracked, non-identity strategy application.
///
/// Only `rolled_back` and `verdict` change after creation, and only through
/// the ledger.
#[derive(Clone, Debug)]
pub struct OptimizationStep<T> {
    /// Step identifier.
    pub id: StepId,
    /// Run the step belongs to.
    pub run_id: RunId,
    /// Value before the rewrite.
    pub original: Arc<T>,
    /// Value produced by the strategy.
    pub transformed: Arc<T>,
    /// Strategy that produced the rewrite.
    pub strategy_name: String,
    /// Context the strategy ran with.
    pub context: Arc<OptimizationContext>,
    /// Position of the strategy in the pipeline.
    pub sequence: usize,
    /// Creation time.
    pub timestamp: OffsetDateTime,
    /// True once verification rejected the step.
    pub rolled_back: bool,
    /// Verification result, once known.
    pub verdict: Option<Verdict>,
}

/// One orchestrator invocation.
#[derive(Clone, Debug, Serialize)]
pub struct OptimizationRun {
    /// Run identifier.
    pub id: RunId,
    /// Steps in tracking order.
    pub steps: Vec<StepId>,
    /// Start time.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// End time, once the run finished.
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

struct Arena<T> {
    runs: Vec<OptimizationRun>,
    run_index: FxHashMap<RunId, usize>,
    steps: Vec<OptimizationStep<T>>,
    step_index: FxHashMap<StepId, usize>,
}

impl<T> Arena<T> {
    fn run_mut(&mut self, id: RunId) -> Option<&mut OptimizationRun> {
        let slot = *self.run_index.get(&id)?;
        self.runs.get_mut(slot)
    }

    fn step_mut(&mut self, id: StepId) -> Option<&mut OptimizationStep<T>> {
        let slot = *self.step_index.get(&id)?;
        self.steps.get_mut(slot)
    }

    fn reindex(&mut self) {
        self.run_index = self
            .runs
            .iter()
            .enumerate()
            .map(|(slot, run)| (run.id, slot))
            .collect();
        self.step_index = self
            .steps
            .iter()
            .enumerate()
            .map(|(slot, step)| (step.id, slot))
            .collect();
    }
}

/// Thread-safe store of runs and steps.
pub struct RollbackLedger<T> {
    next_run: AtomicU64,
    next_step: AtomicU64,
    arena: Mutex<Arena<T>>,
}

impl<T> Default for RollbackLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RollbackLedger<T> {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self {
            next_run: AtomicU64::new(1),
            next_step: AtomicU64::new(1),
            arena: Mutex::new(Arena {
                runs: Vec::new(),
                run_index: FxHashMap::default(),
                steps: Vec::new(),
                step_index: FxHashMap::default(),
            }),
        }
    }

    /// Opens a new run.
    pub fn start_run(&self) -> RunId {
        let id = RunId(self.next_run.fetch_add(1, Ordering::Relaxed));
        let mut arena = self.arena.lock();
        let slot = arena.runs.len();
        arena.runs.push(OptimizationRun {
            id,
            steps: Vec::new(),
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            cancelled: false,
        });
        arena.run_index.insert(id, slot);
        id
    }

    /// Records a non-identity rewrite and returns its id.
    ///
    /// Steps for an unknown run are still stored; they simply are not
    /// listed by [`RollbackLedger::steps`].
    pub fn track_step(
        &self,
        run_id: RunId,
        original: Arc<T>,
        transformed: Arc<T>,
        strategy_name: &str,
        context: Arc<OptimizationContext>,
        sequence: usize,
    ) -> StepId {
        let id = StepId(self.next_step.fetch_add(1, Ordering::Relaxed));
        let mut arena = self.arena.lock();
        let slot = arena.steps.len();
        arena.steps.push(OptimizationStep {
            id,
            run_id,
            original,
            transformed,
            strategy_name: strategy_name.to_string(),
            context,
            sequence,
            timestamp: OffsetDateTime::now_utc(),
            rolled_back: false,
            verdict: None,
        });
        arena.step_index.insert(id, slot);
        if let Some(run) = arena.run_mut(run_id) {
            run.steps.push(id);
        }
        debug!(
            run_id = run_id.0,
            step_id = id.0,
            strategy = strategy_name,
            sequence,
            "ledger.step.tracked"
        );
        id
    }

    /// Stores `verdict` on the step, rolling it back on rejection.
    ///
    /// Returns `false` when the step is unknown.
    pub fn record_verdict(&self, step_id: StepId, verdict: Verdict) -> bool {
        let mut arena = self.arena.lock();
        let Some(step) = arena.step_mut(step_id) else {
            warn!(step_id = step_id.0, "ledger.step.unknown");
            return false;
        };
        if !verdict.accepted {
            step.rolled_back = true;
            debug!(
                run_id = step.run_id.0,
                step_id = step_id.0,
                strategy = %step.strategy_name,
                reason = %verdict.reason,
                "ledger.step.rolled_back"
            );
        }
        step.verdict = Some(verdict);
        true
    }

    /// Closes a run.
    pub fn end_run(&self, run_id: RunId) {
        if let Some(run) = self.arena.lock().run_mut(run_id) {
            run.end_time = Some(OffsetDateTime::now_utc());
        }
    }

    /// Drops every finished run together with its steps and returns how many
    /// runs were removed. Runs still in flight are kept.
    pub fn prune_finished(&self) -> usize {
        let mut arena = self.arena.lock();
        let finished: FxHashSet<RunId> = arena
            .runs
            .iter()
            .filter(|run| run.end_time.is_some())
            .map(|run| run.id)
            .collect();
        if finished.is_empty() {
            return 0;
        }
        arena.runs.retain(|run| !finished.contains(&run.id));
        arena.steps.retain(|step| !finished.contains(&step.run_id));
        arena.reindex();
        debug!(
            removed = finished.len(),
            remaining = arena.runs.len(),
            "ledger.runs.pruned"
        );
        finished.len()
    }

    /// Flags a run as stopped early.
    pub fn mark_cancelled(&self, run_id: RunId) {
        if let Some(run) = self.arena.lock().run_mut(run_id) {
            run.cancelled = true;
        }
    }

    /// Returns the run record.
    pub fn run(&self, run_id: RunId) -> Option<OptimizationRun> {
        let arena = self.arena.lock();
        let slot = *arena.run_index.get(&run_id)?;
        arena.runs.get(slot).cloned()
    }

    /// Number of runs started so far.
    pub fn run_count(&self) -> usize {
        self.arena.lock().runs.len()
    }
}

impl<T> RollbackLedger<T>
where
    OptimizationStep<T>: Clone,
{
    /// Runs `verify` on a snapshot of the step and records the verdict.
    ///
    /// The verifier runs without the ledger lock held. Returns `None` when
    /// the step is unknown.
    pub fn verify_and_rollback<F>(&self, step_id: StepId, verify: F) -> Option<Verdict>
    where
        F: FnOnce(&OptimizationStep<T>) -> Verdict,
    {
        let snapshot = self.step(step_id)?;
        let verdict = verify(&snapshot);
        self.record_verdict(step_id, verdict.clone());
        Some(verdict)
    }

    /// Returns a snapshot of the step.
    pub fn step(&self, step_id: StepId) -> Option<OptimizationStep<T>> {
        let arena = self.arena.lock();
        let slot = *arena.step_index.get(&step_id)?;
        arena.steps.get(slot).cloned()
    }

    /// Returns snapshots of a run's steps in tracking order.
    pub fn steps(&self, run_id: RunId) -> Vec<OptimizationStep<T>> {
        let arena = self.arena.lock();
        let Some(run) = arena
            .run_index
            .get(&run_id)
            .and_then(|slot| arena.runs.get(*slot))
        else {
            return Vec::new();
        };
        run.steps
            .iter()
            .filter_map(|id| arena.step_index.get(id))
            .filter_map(|slot| arena.steps.get(*slot))
            .cloned()
            .collect()
    }
}
