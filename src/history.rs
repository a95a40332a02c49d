#![forbid(unsafe_code)]

//! Append-only audit trail of `optimize` calls.
//!
//! Entries accumulate for the lifetime of the optimizer. Long-lived callers
//! export them periodically with [`OptimizationHistory::drain`]; indices keep
//! counting across drains, so an index never names two different calls.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;

use crate::context::OptimizationContext;
use crate::types::RunId;

/// Record of one top-level `optimize` call.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry<T, A> {
    /// Input as validated.
    pub original: T,
    /// Committed result.
    pub optimized: T,
    /// Analysis of the input.
    pub analysis: A,
    /// Context the call ran with.
    pub context: OptimizationContext,
    /// Ledger run backing the call.
    pub run_id: RunId,
    /// Completion time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Position in the history.
    pub index: usize,
    /// Strategies whose rewrites were committed, in order.
    pub accepted_steps: Vec<String>,
    /// Strategies whose rewrites were rolled back, in order.
    pub rejected_steps: Vec<String>,
    /// Whether the call stopped early.
    pub cancelled: bool,
}

struct Log<T, A> {
    first_index: usize,
    entries: Vec<Arc<HistoryEntry<T, A>>>,
}

/// History owned by one optimizer instance.
pub struct OptimizationHistory<T, A> {
    log: RwLock<Log<T, A>>,
}

impl<T, A> Default for OptimizationHistory<T, A> {
    fn default() -> Self {
        Self {
            log: RwLock::new(Log {
                first_index: 0,
                entries: Vec::new(),
            }),
        }
    }
}

impl<T, A> OptimizationHistory<T, A> {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, assigning its index, and returns that index.
    pub(crate) fn append(&self, mut entry: HistoryEntry<T, A>) -> usize {
        let mut log = self.log.write();
        let index = log.first_index + log.entries.len();
        entry.index = index;
        log.entries.push(Arc::new(entry));
        index
    }

    /// Snapshot of every retained entry in append order.
    pub fn entries(&self) -> Vec<Arc<HistoryEntry<T, A>>> {
        self.log.read().entries.clone()
    }

    /// Entry at `index`, unless it was drained.
    pub fn get(&self, index: usize) -> Option<Arc<HistoryEntry<T, A>>> {
        let log = self.log.read();
        let slot = index.checked_sub(log.first_index)?;
        log.entries.get(slot).cloned()
    }

    /// Most recent retained entry.
    pub fn latest(&self) -> Option<Arc<HistoryEntry<T, A>>> {
        self.log.read().entries.last().cloned()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.log.read().entries.len()
    }

    /// True when no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.log.read().entries.is_empty()
    }

    /// Removes and returns every retained entry.
    pub fn drain(&self) -> Vec<Arc<HistoryEntry<T, A>>> {
        let mut log = self.log.write();
        let drained = std::mem::take(&mut log.entries);
        log.first_index += drained.len();
        drained
    }
}
