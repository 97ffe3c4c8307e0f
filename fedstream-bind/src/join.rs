//! Bind-type interpretation of binding resolutions.
//!
//! The correlator guarantees exactly-once empty/non-empty notification per
//! binding; what those notifications *mean* depends on the join operator
//! being evaluated. Matched result rows always flow through the parser's
//! output batches, so this layer only produces the rows a plain result
//! stream cannot carry: null-extended rows for `LEFT JOIN`, surviving
//! bindings for `MINUS` / `NOT EXISTS`, and matched bindings for `EXISTS`.

use fedstream_tabular::Term;
use tokio::sync::mpsc;

use crate::queue::BindingRow;
use crate::receiver::BindNotify;

/// How the join layer interprets binding resolutions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindType {
    Join,
    LeftJoin,
    Exists,
    NotExists,
    Minus,
}

impl BindType {
    /// Whether an unmatched binding produces an output row.
    pub fn emits_on_empty(self) -> bool {
        matches!(self, BindType::LeftJoin | BindType::NotExists | BindType::Minus)
    }

    /// Whether a matched binding produces an output row by itself
    /// (independent of the remote result rows).
    pub fn emits_on_match(self) -> bool {
        matches!(self, BindType::Exists)
    }

    /// Whether the remote's result rows appear in the output at all.
    pub fn streams_result_rows(self) -> bool {
        matches!(self, BindType::Join | BindType::LeftJoin)
    }
}

/// [`BindNotify`] implementation applying the standard join semantics.
///
/// Emitted rows are in output-column order and sized to the output width;
/// binding values land at their projected positions, everything else stays
/// null. Rows go out on an unbounded channel so emission never blocks the
/// parsing task.
pub struct JoinObserver {
    bind_type: BindType,
    /// Binding column -> output column.
    projection: Vec<Option<usize>>,
    width: usize,
    rows: mpsc::UnboundedSender<BindingRow>,
}

impl JoinObserver {
    pub fn new(
        bind_type: BindType,
        projection: Vec<Option<usize>>,
        width: usize,
    ) -> (Self, mpsc::UnboundedReceiver<BindingRow>) {
        let (rows, rx) = mpsc::unbounded_channel();
        (
            Self {
                bind_type,
                projection,
                width,
                rows,
            },
            rx,
        )
    }

    fn emit_binding(&mut self, binding: &[Option<Term>]) {
        let mut out: BindingRow = vec![None; self.width];
        for (i, term) in binding.iter().enumerate() {
            if let (Some(Some(col)), Some(term)) = (self.projection.get(i), term) {
                out[*col] = Some(term.clone());
            }
        }
        // Receiver dropped means the consumer is gone; nothing to do.
        let _ = self.rows.send(out);
    }
}

impl BindNotify for JoinObserver {
    fn on_empty(&mut self, _seq: u64, binding: &[Option<Term>]) {
        if self.bind_type.emits_on_empty() {
            self.emit_binding(binding);
        }
    }

    fn on_match(&mut self, _seq: u64, binding: &[Option<Term>]) {
        if self.bind_type.emits_on_match() {
            self.emit_binding(binding);
        }
    }
}
