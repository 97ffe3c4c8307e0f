//! The sent-bindings queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use fedstream_tabular::Term;

/// One transmitted binding row, in the binding source's column order.
pub type BindingRow = Vec<Option<Term>>;

/// Queue of in-flight binding rows, shared between the sender task (which
/// appends at the tail as rows are serialized) and the parsing task (which
/// pops from the head as results resolve).
///
/// # Invariants
///
/// - Entries are pushed with strictly increasing sequence numbers
/// - Rows are popped strictly head-first, matching transmission order
/// - The queue never retains a row whose sequence has been resolved
#[derive(Debug, Default)]
pub struct SentBindings {
    inner: Mutex<VecDeque<(u64, BindingRow)>>,
}

impl SentBindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(u64, BindingRow)>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a transmitted row at the tail.
    pub fn push(&self, seq: u64, row: BindingRow) {
        let mut q = self.lock();
        debug_assert!(q.back().map_or(true, |(s, _)| *s < seq));
        q.push_back((seq, row));
    }

    /// Pop the oldest in-flight row.
    pub fn pop_front(&self) -> Option<(u64, BindingRow)> {
        self.lock().pop_front()
    }

    /// Sequence number at the head, if any rows are in flight.
    pub fn head_seq(&self) -> Option<u64> {
        self.lock().front().map(|(s, _)| *s)
    }

    /// Number of in-flight rows.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain every remaining row, oldest first (end-of-stream resolution).
    pub fn drain(&self) -> Vec<(u64, BindingRow)> {
        self.lock().drain(..).collect()
    }
}
