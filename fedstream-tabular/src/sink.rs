//! Batch handoff and recycling.

use std::sync::Arc;

use crate::batch::RowBatch;
use crate::vars::VarSet;

/// Reply from offering a batch downstream.
#[derive(Debug)]
pub enum SinkReply {
    /// Batch accepted; here is an empty batch to fill next (fresh or recycled).
    Accepted(RowBatch),
    /// The consumer is closed or cancelled; stop producing.
    Closed,
}

/// Downstream consumer of completed row batches.
///
/// `offer` transfers ownership of a full batch and either returns a reusable
/// empty batch or signals that the consumer no longer wants rows. Producers
/// must treat `Closed` as terminal.
pub trait BatchSink {
    fn offer(&mut self, batch: RowBatch) -> SinkReply;
}

/// Sink that accumulates batches in memory.
///
/// Used by tests and by callers that drain a bounded result set. Recycled
/// batches come from an internal free list once the caller starts returning
/// them with [`CollectSink::recycle`].
#[derive(Debug)]
pub struct CollectSink {
    vars: Arc<VarSet>,
    capacity: usize,
    batches: Vec<RowBatch>,
    free: Vec<RowBatch>,
    closed: bool,
}

impl CollectSink {
    pub fn new(vars: Arc<VarSet>, capacity: usize) -> Self {
        Self {
            vars,
            capacity,
            batches: Vec::new(),
            free: Vec::new(),
            closed: false,
        }
    }

    /// Mark the sink closed; subsequent offers are refused.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Batches received so far.
    pub fn batches(&self) -> &[RowBatch] {
        &self.batches
    }

    /// Total committed rows across all received batches.
    pub fn total_rows(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }

    /// Drain all received batches.
    pub fn take_batches(&mut self) -> Vec<RowBatch> {
        std::mem::take(&mut self.batches)
    }

    /// Return a drained batch to the free list for reuse.
    pub fn recycle(&mut self, mut batch: RowBatch) {
        batch.clear();
        self.free.push(batch);
    }

    /// Flatten all received rows into owned row vectors (test convenience).
    pub fn rows(&self) -> Vec<Vec<Option<crate::term::Term>>> {
        let mut out = Vec::new();
        for batch in &self.batches {
            for i in 0..batch.len() {
                if let Some(row) = batch.row(i) {
                    out.push(row);
                }
            }
        }
        out
    }
}

impl BatchSink for CollectSink {
    fn offer(&mut self, batch: RowBatch) -> SinkReply {
        if self.closed {
            return SinkReply::Closed;
        }
        self.batches.push(batch);
        let next = self
            .free
            .pop()
            .unwrap_or_else(|| RowBatch::new(Arc::clone(&self.vars), self.capacity));
        SinkReply::Accepted(next)
    }
}
