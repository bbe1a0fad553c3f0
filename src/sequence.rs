//! Per-operation sequence cursors.
//!
//! Each operation owns one atomic cell. Advancing is a compare-and-swap loop,
//! so concurrent resolutions against the same operation each observe a
//! distinct position and none is skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::RwLock;
use std::sync::Arc;

/// Sequence cursors keyed by operation id.
#[derive(Debug, Default)]
pub struct SequenceStore {
    cursors: RwLock<HashMap<String, Arc<AtomicUsize>>>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation with its configured starting index.
    ///
    /// An already registered cursor keeps its position.
    pub fn register(&self, operation_id: &str, start: usize) {
        let mut cursors = self.cursors.write();
        cursors
            .entry(operation_id.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(start)));
    }

    /// Claim the next position among `count` eligible responses.
    ///
    /// Returns the index to use (`cursor mod count`) and stores
    /// `(index + 1) mod count`. The stored value is re-clamped against the
    /// current `count` on every call, so shrinking the eligible set never
    /// leaves an out-of-range cursor behind. Returns `None` when `count` is 0.
    pub fn next(&self, operation_id: &str, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }

        let cell = self.cell(operation_id);
        let previous = cell
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current % count + 1) % count)
            })
            .unwrap_or_else(|current| current);
        Some(previous % count)
    }

    /// Current stored cursor value.
    pub fn current(&self, operation_id: &str) -> usize {
        let cursors = self.cursors.read();
        cursors
            .get(operation_id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn cell(&self, operation_id: &str) -> Arc<AtomicUsize> {
        {
            let cursors = self.cursors.read();
            if let Some(cell) = cursors.get(operation_id) {
                return Arc::clone(cell);
            }
        }
        let mut cursors = self.cursors.write();
        Arc::clone(
            cursors
                .entry(operation_id.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0))),
        )
    }
}
