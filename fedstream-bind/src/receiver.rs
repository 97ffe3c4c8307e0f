//! Receiver-side binding correlation.
//!
//! The result parser hands every observed binding sequence number here; the
//! correlator reconciles it against the sent-bindings queue and guarantees
//! exactly one notification (empty or non-empty) per binding sent, in
//! sequence order, including when the stream ends with bindings still
//! unresolved.

use std::sync::Arc;

use fedstream_protocol::{BindDelegate, Credit, Result, StreamError};
use fedstream_results::{role::Prefill, ParserRole};
use fedstream_tabular::{Term, VarSet};

use crate::credit::CreditGate;
use crate::queue::{BindingRow, SentBindings};

/// Observer of per-binding resolution.
///
/// The join layer interprets these according to the bind type (`LEFT JOIN`
/// null-extends on empty, `MINUS` keeps the binding only on empty, and so
/// on); this component only guarantees correct, in-order, exactly-once
/// delivery.
pub trait BindNotify: Send {
    /// Binding `seq` matched no result rows.
    fn on_empty(&mut self, seq: u64, binding: &[Option<Term>]);
    /// Binding `seq` matched at least one result row.
    fn on_match(&mut self, seq: u64, binding: &[Option<Term>]);
}

struct Active {
    seq: u64,
    row: BindingRow,
    notified: bool,
}

/// The client-side parser role for a join execution: forwards credit grants
/// to the sender's gate, resolves sequence numbers against the in-flight
/// queue, and copies resolved binding values into output rows ahead of the
/// wire values.
pub struct JoinCorrelator {
    queue: Arc<SentBindings>,
    credit: Arc<CreditGate>,
    /// Binding column -> output column, computed once at construction.
    projection: Vec<Option<usize>>,
    notify: Box<dyn BindNotify>,
    current: Option<Active>,
    last_resolved: Option<u64>,
    /// Set when `!active-binding` declared the context; rows then carry no
    /// inline sequence column and pre-fill at row begin instead.
    active_context: bool,
}

impl JoinCorrelator {
    /// Compute the binding-to-output projection once and wire up the shared
    /// queue and credit gate.
    pub fn new(
        binding_vars: &VarSet,
        out_vars: &VarSet,
        queue: Arc<SentBindings>,
        credit: Arc<CreditGate>,
        notify: Box<dyn BindNotify>,
    ) -> Self {
        let projection = binding_projection(binding_vars, out_vars);
        Self {
            queue,
            credit,
            projection,
            notify,
            current: None,
            last_resolved: None,
            active_context: false,
        }
    }

    fn prefill_current(&self) -> Prefill {
        let Some(active) = self.current.as_ref() else {
            return Vec::new();
        };
        active
            .row
            .iter()
            .enumerate()
            .filter_map(|(i, term)| {
                let out = self.projection.get(i).copied().flatten()?;
                term.as_ref().map(|t| (out, t.clone()))
            })
            .collect()
    }

    /// An unnotified active binding resolves as empty when superseded.
    fn retire_current(&mut self) {
        if let Some(active) = self.current.take() {
            if !active.notified {
                self.notify.on_empty(active.seq, &active.row);
            }
        }
    }

    fn check_monotonic(&self, seq: u64) -> Result<()> {
        if let Some(active) = self.current.as_ref() {
            if seq < active.seq {
                return Err(StreamError::violation(format!(
                    "Binding sequence went backwards: {} after {}",
                    seq, active.seq
                )));
            }
        }
        if let Some(last) = self.last_resolved {
            if seq <= last {
                return Err(StreamError::violation(format!(
                    "Binding sequence {} already resolved (last resolved {})",
                    seq, last
                )));
            }
        }
        Ok(())
    }

    /// Pop the queue head up to `seq`, resolving skipped bindings as empty.
    /// The entry for `seq` itself becomes the current binding.
    fn advance_to(&mut self, seq: u64, notified: bool) -> Result<()> {
        self.retire_current();
        loop {
            let Some((s, row)) = self.queue.pop_front() else {
                return Err(StreamError::violation(format!(
                    "Binding sequence {} referenced before being sent",
                    seq
                )));
            };
            if s < seq {
                self.notify.on_empty(s, &row);
                continue;
            }
            if s > seq {
                return Err(StreamError::violation(format!(
                    "Binding sequence {} not in flight (head was {})",
                    seq, s
                )));
            }
            if notified {
                self.notify.on_match(seq, &row);
            }
            self.current = Some(Active {
                seq,
                row,
                notified,
            });
            self.last_resolved = Some(seq);
            return Ok(());
        }
    }
}

impl BindDelegate for JoinCorrelator {
    fn on_bind_request(&mut self, credit: Credit) -> Result<()> {
        tracing::debug!(credit = %credit, "peer granted binding credit");
        self.credit.grant(credit);
        Ok(())
    }

    fn on_bind_empty_streak(&mut self, seq: u64) -> Result<()> {
        self.check_monotonic(seq)?;
        self.retire_current();
        let mut resolved_any = false;
        while self.queue.head_seq().is_some_and(|s| s <= seq) {
            if let Some((s, row)) = self.queue.pop_front() {
                self.notify.on_empty(s, &row);
                resolved_any = true;
            }
        }
        if !resolved_any && self.last_resolved.map_or(true, |last| last < seq) {
            return Err(StreamError::violation(format!(
                "Empty streak up to {} references bindings never sent",
                seq
            )));
        }
        self.last_resolved = Some(seq);
        Ok(())
    }

    fn on_active_binding(&mut self, seq: u64) -> Result<()> {
        if self.current.as_ref().is_some_and(|a| a.seq == seq) {
            // Redundant re-declaration of the current context.
            self.active_context = true;
            return Ok(());
        }
        self.check_monotonic(seq)?;
        self.advance_to(seq, false)?;
        self.active_context = true;
        Ok(())
    }
}

impl ParserRole for JoinCorrelator {
    fn on_row_begin(&mut self) -> Result<Prefill> {
        if !self.active_context {
            return Ok(Vec::new());
        }
        if let Some(active) = self.current.as_mut() {
            if !active.notified {
                active.notified = true;
                let seq = active.seq;
                let row = active.row.clone();
                self.notify.on_match(seq, &row);
            }
        }
        Ok(self.prefill_current())
    }

    fn on_sequence(&mut self, seq: u64) -> Result<Prefill> {
        if let Some(active) = self.current.as_mut() {
            if active.seq == seq {
                if !active.notified {
                    active.notified = true;
                    let row = active.row.clone();
                    self.notify.on_match(seq, &row);
                }
                return Ok(self.prefill_current());
            }
        }
        self.check_monotonic(seq)?;
        self.advance_to(seq, true)?;
        Ok(self.prefill_current())
    }

    fn on_clean_end(&mut self) -> Result<()> {
        self.retire_current();
        for (seq, row) in self.queue.drain() {
            self.notify.on_empty(seq, &row);
        }
        Ok(())
    }
}

/// Map binding source columns onto output columns by variable name.
pub fn binding_projection(binding_vars: &VarSet, out_vars: &VarSet) -> Vec<Option<usize>> {
    binding_vars
        .iter()
        .map(|name| out_vars.position(name))
        .collect()
}
