//! Columnar row batches with an explicit row commit protocol.

use std::sync::Arc;

use crate::error::{Result, TabularError};
use crate::term::Term;
use crate::vars::VarSet;

/// A size-bounded columnar batch of result rows.
///
/// Rows are appended through `begin_row` / `put_value` / `commit_row`, so a row
/// started at end-of-stream but never completed can be discarded with
/// `abort_row` without ever becoming visible. The column count is fixed at the
/// number of output variables; a zero-column batch still counts rows (boolean
/// ask results).
///
/// # Invariants
///
/// - All columns always hold exactly `num_rows` committed values
/// - Values staged with `put_value` are invisible until `commit_row`
#[derive(Debug)]
pub struct RowBatch {
    vars: Arc<VarSet>,
    columns: Vec<Vec<Option<Term>>>,
    num_rows: usize,
    capacity: usize,
    /// Staged values for the row currently in progress.
    pending: Vec<Option<Term>>,
    row_open: bool,
}

impl RowBatch {
    /// Create an empty batch for the given output variables.
    pub fn new(vars: Arc<VarSet>, capacity: usize) -> Self {
        let width = vars.len();
        Self {
            vars,
            columns: (0..width).map(|_| Vec::with_capacity(capacity)).collect(),
            num_rows: 0,
            capacity,
            pending: vec![None; width],
            row_open: false,
        }
    }

    /// The output variables defining this batch's columns.
    #[inline]
    pub fn vars(&self) -> &Arc<VarSet> {
        &self.vars
    }

    /// Number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of committed rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_rows
    }

    /// True when no rows have been committed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// True once the batch has reached its row capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.num_rows >= self.capacity
    }

    /// True while a row is open (begun but not committed or aborted).
    #[inline]
    pub fn row_open(&self) -> bool {
        self.row_open
    }

    /// Mark a new row as started.
    ///
    /// Idempotent: beginning a row while one is already open is a no-op, so a
    /// driver resuming after a suspension cannot double-start a row.
    pub fn begin_row(&mut self) {
        if !self.row_open {
            self.row_open = true;
            self.pending.iter_mut().for_each(|v| *v = None);
        }
    }

    /// Stage a value for the open row.
    pub fn put_value(&mut self, column: usize, term: Term) -> Result<()> {
        if !self.row_open {
            return Err(TabularError::NoOpenRow);
        }
        let width = self.columns.len();
        let slot = self
            .pending
            .get_mut(column)
            .ok_or(TabularError::ColumnOutOfRange { column, width })?;
        *slot = Some(term);
        Ok(())
    }

    /// Finalize the open row into the batch.
    pub fn commit_row(&mut self) -> Result<()> {
        if !self.row_open {
            return Err(TabularError::NoOpenRow);
        }
        for (col, slot) in self.columns.iter_mut().zip(self.pending.iter_mut()) {
            col.push(slot.take());
        }
        self.num_rows += 1;
        self.row_open = false;
        Ok(())
    }

    /// Discard the open row, if any.
    pub fn abort_row(&mut self) {
        self.pending.iter_mut().for_each(|v| *v = None);
        self.row_open = false;
    }

    /// Get the committed value at (row, column).
    pub fn value(&self, row: usize, column: usize) -> Option<&Term> {
        self.columns.get(column)?.get(row)?.as_ref()
    }

    /// Staged value for the open row (mainly for correlation merge checks).
    pub fn pending_value(&self, column: usize) -> Option<&Term> {
        self.pending.get(column)?.as_ref()
    }

    /// Materialize one committed row as an owned vector.
    pub fn row(&self, row: usize) -> Option<Vec<Option<Term>>> {
        if row >= self.num_rows {
            return None;
        }
        Some(self.columns.iter().map(|c| c[row].clone()).collect())
    }

    /// Clear all rows and any open row state, keeping allocations for reuse.
    pub fn clear(&mut self) {
        for col in &mut self.columns {
            col.clear();
        }
        self.num_rows = 0;
        self.abort_row();
    }
}
