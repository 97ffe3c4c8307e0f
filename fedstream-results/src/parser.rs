//! The incremental row parser engine.
//!
//! Owns the state shared by every format: the suspension buffer, the current
//! batch and its sink, the prefix map, the role delegate, and the single
//! terminal completion slot. Format tokenizers drive rows and control frames
//! into [`Core`]; the engine guarantees that exactly one terminal outcome is
//! recorded no matter which path fires first (`end`, `fail`, a parse error,
//! peer termination, or sink cancellation).

use std::sync::Arc;

use fedstream_protocol::{ControlFrame, PrefixMap, Result, StreamError, SEQ_VAR};
use fedstream_tabular::{
    BatchSink, RowBatch, SinkReply, Term, VarSet, WellKnownDatatypes, DEFAULT_BATCH_ROWS,
};

use crate::delim::DelimTokenizer;
use crate::json::JsonTokenizer;
use crate::role::ParserRole;
use crate::ResultFormat;

/// Terminal outcome of one parser lifetime, reported exactly once.
#[derive(Debug)]
pub enum Completion {
    /// Clean end of stream (`!end`, document close, or `end()` with no
    /// pending malformed state).
    Ended,
    /// The downstream consumer cancelled, or the peer acknowledged our
    /// cancellation; producing stopped.
    Cancelled,
    /// Terminal error (malformed input, protocol violation, peer signal, or
    /// transport failure).
    Failed(StreamError),
}

/// Parser tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct ParserOptions {
    /// Row capacity of each batch handed downstream.
    pub batch_rows: usize,
    /// Answer `!ping` with a queued `!ping-ack` automatically.
    pub auto_ping_ack: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            batch_rows: DEFAULT_BATCH_ROWS,
            auto_ping_ack: true,
        }
    }
}

/// Column mapping from the wire-declared variable order onto the requested
/// output order.
///
/// Unknown input columns are dropped; requested variables absent from the
/// input simply stay null. The reserved sequence variable is never projected
/// to output; its position is tracked separately.
#[derive(Debug)]
pub struct Projection {
    wire_to_out: Vec<Option<usize>>,
    seq_col: Option<usize>,
}

impl Projection {
    /// Compute the projection once, from the wire header onto `out`.
    pub fn new<S: AsRef<str>>(wire_vars: &[S], out: &VarSet) -> Self {
        let mut wire_to_out = Vec::with_capacity(wire_vars.len());
        let mut seq_col = None;
        for (i, name) in wire_vars.iter().enumerate() {
            let name = name.as_ref();
            if name == SEQ_VAR {
                seq_col = Some(i);
                wire_to_out.push(None);
            } else {
                wire_to_out.push(out.position(name));
            }
        }
        Self {
            wire_to_out,
            seq_col,
        }
    }

    /// Number of wire columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.wire_to_out.len()
    }

    /// Output column for a wire column, if projected.
    #[inline]
    pub fn output_column(&self, wire: usize) -> Option<usize> {
        self.wire_to_out.get(wire).copied().flatten()
    }

    /// Whether the wire column carries the binding sequence number.
    #[inline]
    pub fn is_seq_column(&self, wire: usize) -> bool {
        self.seq_col == Some(wire)
    }

    /// Whether the wire header declared the reserved sequence variable.
    #[inline]
    pub fn has_seq(&self) -> bool {
        self.seq_col.is_some()
    }
}

/// What a tokenizer did with the supplied buffer.
pub(crate) enum Advance {
    /// Everything consumed into committed state; stream continues.
    Done,
    /// Incomplete trailing token; `buf[resume_from..]` must be retained and
    /// re-scanned once more bytes arrive.
    Suspend { resume_from: usize },
    /// The stream terminated inside this buffer.
    Finished(FinishKind),
}

pub(crate) enum FinishKind {
    /// `!end` (or document close) with nothing after it.
    CleanEnd,
    /// Peer acknowledged our cancellation.
    Cancelled,
}

/// Disposition after a control frame is handled.
pub(crate) enum ControlAction {
    Continue,
    EndOfStream,
    CancelAcknowledged,
}

enum Tokenizer {
    Delim(DelimTokenizer),
    Json(JsonTokenizer),
}

impl Tokenizer {
    fn new(format: ResultFormat) -> Self {
        match format {
            ResultFormat::Tsv | ResultFormat::Csv => {
                Tokenizer::Delim(DelimTokenizer::new(format))
            }
            ResultFormat::Json => Tokenizer::Json(JsonTokenizer::new()),
        }
    }
}

/// Engine state shared with the format tokenizers.
pub(crate) struct Core<S: BatchSink> {
    vars: Arc<VarSet>,
    sink: S,
    role: Box<dyn ParserRole>,
    prefixes: PrefixMap,
    datatypes: WellKnownDatatypes,
    batch: Option<RowBatch>,
    outbound: Vec<ControlFrame>,
    options: ParserOptions,
    /// Set when a suspension occurred; the next commit flushes immediately so
    /// a stalled row does not delay rows that are already ready.
    eager: bool,
    peer_terminated: bool,
    terminated: bool,
    completion: Option<Completion>,
}

impl<S: BatchSink> Core<S> {
    fn new(vars: Arc<VarSet>, sink: S, role: Box<dyn ParserRole>, options: ParserOptions) -> Self {
        let batch = RowBatch::new(Arc::clone(&vars), options.batch_rows);
        Self {
            vars,
            sink,
            role,
            prefixes: PrefixMap::new(),
            datatypes: WellKnownDatatypes::new(),
            batch: Some(batch),
            outbound: Vec::new(),
            options,
            eager: false,
            peer_terminated: false,
            terminated: false,
            completion: None,
        }
    }

    #[inline]
    pub(crate) fn terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn vars(&self) -> &Arc<VarSet> {
        &self.vars
    }

    pub(crate) fn prefixes(&self) -> &PrefixMap {
        &self.prefixes
    }

    pub(crate) fn datatypes(&self) -> &WellKnownDatatypes {
        &self.datatypes
    }

    pub(crate) fn set_eager(&mut self) {
        self.eager = true;
    }

    /// Start a data row, pre-filling from the role's active binding context.
    pub(crate) fn begin_row(&mut self) -> Result<()> {
        if self.terminated() {
            return Ok(());
        }
        let prefill = self.role.on_row_begin()?;
        if let Some(batch) = self.batch.as_mut() {
            batch.begin_row();
            for (col, term) in prefill {
                if batch.pending_value(col).is_none() {
                    batch.put_value(col, term)?;
                }
            }
        }
        Ok(())
    }

    /// Stage a parsed wire value into an output column.
    pub(crate) fn put(&mut self, out_col: usize, term: Term) -> Result<()> {
        if self.terminated() {
            return Ok(());
        }
        if let Some(batch) = self.batch.as_mut() {
            batch.put_value(out_col, term)?;
        }
        Ok(())
    }

    /// The current row's reserved sequence column carried `seq`. The role
    /// resolves the binding and returns its values, which land in every
    /// output slot the wire has not already filled.
    pub(crate) fn apply_sequence(&mut self, seq: u64) -> Result<()> {
        if self.terminated() {
            return Ok(());
        }
        let prefill = self.role.on_sequence(seq)?;
        if let Some(batch) = self.batch.as_mut() {
            for (col, term) in prefill {
                if batch.pending_value(col).is_none() {
                    batch.put_value(col, term)?;
                }
            }
        }
        Ok(())
    }

    /// Finalize the row in progress.
    pub(crate) fn commit_row(&mut self) -> Result<()> {
        if self.terminated() {
            return Ok(());
        }
        let mut full = false;
        if let Some(batch) = self.batch.as_mut() {
            batch.commit_row()?;
            full = batch.is_full();
        }
        if full || self.eager {
            self.eager = false;
            self.flush_batch();
        }
        Ok(())
    }

    /// Emit one zero-column row for a boolean `true` result.
    pub(crate) fn emit_ask_row(&mut self) -> Result<()> {
        if self.terminated() {
            return Ok(());
        }
        if let Some(batch) = self.batch.as_mut() {
            batch.begin_row();
        }
        self.commit_row()
    }

    /// Hand the current batch downstream if it holds committed rows.
    fn flush_batch(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        if batch.is_empty() {
            self.batch = Some(batch);
            return;
        }
        match self.sink.offer(batch) {
            SinkReply::Accepted(next) => self.batch = Some(next),
            SinkReply::Closed => self.complete_cancelled(),
        }
    }

    /// Dispatch one recognized control frame.
    pub(crate) fn handle_control(&mut self, frame: ControlFrame) -> Result<ControlAction> {
        match frame {
            ControlFrame::End => Ok(ControlAction::EndOfStream),
            ControlFrame::Cancel => {
                self.peer_terminated = true;
                Err(StreamError::PeerCancelled)
            }
            ControlFrame::Cancelled => {
                self.peer_terminated = true;
                Ok(ControlAction::CancelAcknowledged)
            }
            ControlFrame::Error(msg) => {
                self.peer_terminated = true;
                Err(StreamError::PeerError(msg))
            }
            ControlFrame::Prefix { name, iri } => {
                tracing::debug!(prefix = %name, iri = %iri, "peer declared prefix");
                self.prefixes.insert(name, iri);
                Ok(ControlAction::Continue)
            }
            ControlFrame::Ping => {
                if self.options.auto_ping_ack {
                    self.outbound.push(ControlFrame::PingAck);
                }
                Ok(ControlAction::Continue)
            }
            ControlFrame::PingAck => Ok(ControlAction::Continue),
            ControlFrame::Info(text) => {
                tracing::info!(info = %text, "peer info");
                Ok(ControlAction::Continue)
            }
            ControlFrame::BindRequest(credit) => {
                self.role.on_bind_request(credit)?;
                Ok(ControlAction::Continue)
            }
            ControlFrame::BindEmptyStreak(seq) => {
                self.role.on_bind_empty_streak(seq)?;
                Ok(ControlAction::Continue)
            }
            ControlFrame::ActiveBinding(seq) => {
                self.role.on_active_binding(seq)?;
                Ok(ControlAction::Continue)
            }
        }
    }

    fn complete_clean(&mut self) {
        if self.terminated() {
            return;
        }
        if let Err(err) = self.role.on_clean_end() {
            self.complete_failed(err);
            return;
        }
        if let Some(batch) = self.batch.as_mut() {
            batch.abort_row();
        }
        self.flush_batch();
        if !self.terminated() {
            self.terminated = true;
            self.completion = Some(Completion::Ended);
        }
        self.batch = None;
    }

    fn complete_cancelled(&mut self) {
        if self.terminated() {
            return;
        }
        self.terminated = true;
        self.completion = Some(Completion::Cancelled);
        self.batch = None;
    }

    fn complete_failed(&mut self, error: StreamError) {
        if self.terminated() {
            return;
        }
        tracing::warn!(error = %error, "result stream failed");
        if let Some(batch) = self.batch.as_mut() {
            batch.abort_row();
        }
        self.flush_batch();
        if !self.terminated() {
            self.terminated = true;
            self.completion = Some(Completion::Failed(error));
        }
        self.batch = None;
    }
}

/// The incremental result-stream parser.
///
/// Push-based: the transport calls [`feed`](Self::feed) with each arriving
/// chunk on one logical thread, then exactly one of [`end`](Self::end) or
/// [`fail`](Self::fail). After the first terminal event (including sink
/// cancellation and peer termination) further input is ignored and cleanup
/// has already run; [`completion`](Self::completion) reports the single
/// outcome.
pub struct ResultParser<S: BatchSink> {
    core: Core<S>,
    tokenizer: Tokenizer,
    pending: Vec<u8>,
    format: ResultFormat,
}

impl<S: BatchSink> ResultParser<S> {
    /// Create a parser for `format` producing rows in `vars` order.
    pub fn new(format: ResultFormat, vars: Arc<VarSet>, sink: S, role: Box<dyn ParserRole>) -> Self {
        Self::with_options(format, vars, sink, role, ParserOptions::default())
    }

    pub fn with_options(
        format: ResultFormat,
        vars: Arc<VarSet>,
        sink: S,
        role: Box<dyn ParserRole>,
        options: ParserOptions,
    ) -> Self {
        Self {
            core: Core::new(vars, sink, role, options),
            tokenizer: Tokenizer::new(format),
            pending: Vec::new(),
            format,
        }
    }

    /// Feed one chunk of the stream.
    ///
    /// The bytes are logically appended to everything fed before. No
    /// reference to `bytes` is retained past the call: any incomplete
    /// trailing token is copied into the suspension buffer, so the caller may
    /// reuse its buffer immediately. Errors never surface here; check
    /// [`completion`](Self::completion).
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.core.terminated() {
            return;
        }
        if self.pending.is_empty() {
            self.run(bytes, false);
        } else {
            let mut buf = std::mem::take(&mut self.pending);
            buf.extend_from_slice(bytes);
            self.run(&buf, false);
        }
    }

    /// Signal clean end-of-input. Flushes pending partial state; a stream
    /// ending in an illegal state (open quote, mid-document) fails here.
    pub fn end(&mut self) {
        if self.core.terminated() {
            return;
        }
        let buf = std::mem::take(&mut self.pending);
        self.run(&buf, true);
    }

    /// Signal an error not originating from parsing (transport failure).
    /// Committed rows are flushed best-effort; the error is forwarded
    /// downstream exactly once.
    pub fn fail(&mut self, error: StreamError) {
        if self.core.terminated() {
            return;
        }
        self.pending.clear();
        self.core.complete_failed(error);
    }

    fn run(&mut self, buf: &[u8], final_input: bool) {
        let outcome = match &mut self.tokenizer {
            Tokenizer::Delim(t) => t.advance(buf, &mut self.core, final_input),
            Tokenizer::Json(t) => t.advance(buf, &mut self.core, final_input),
        };
        match outcome {
            Ok(Advance::Done) => {
                if final_input {
                    self.core.complete_clean();
                }
            }
            Ok(Advance::Suspend { resume_from }) => {
                if final_input {
                    // Tokenizers resolve all state themselves on final input.
                    self.core.complete_clean();
                } else if resume_from < buf.len() {
                    self.pending.extend_from_slice(&buf[resume_from..]);
                    self.core.set_eager();
                }
            }
            Ok(Advance::Finished(FinishKind::CleanEnd)) => self.core.complete_clean(),
            Ok(Advance::Finished(FinishKind::Cancelled)) => self.core.complete_cancelled(),
            Err(err) => self.core.complete_failed(err),
        }
        if self.core.terminated() {
            self.pending.clear();
        }
    }

    /// The terminal outcome, once one exists.
    pub fn completion(&self) -> Option<&Completion> {
        self.core.completion.as_ref()
    }

    /// Take the terminal outcome, leaving the parser terminated.
    pub fn take_completion(&mut self) -> Option<Completion> {
        self.core.completion.take()
    }

    /// True once any terminal path has fired.
    pub fn is_terminated(&self) -> bool {
        self.core.terminated()
    }

    /// True when the peer signaled termination (`!cancel`, `!cancelled`,
    /// `!error`); senders skip their best-effort cancel frame in that case.
    pub fn peer_terminated(&self) -> bool {
        self.core.peer_terminated
    }

    /// Drain control frames queued for the outbound side (ping acks).
    pub fn take_outbound(&mut self) -> Vec<ControlFrame> {
        std::mem::take(&mut self.core.outbound)
    }

    /// The prefix map accumulated from `!prefix` declarations.
    pub fn prefixes(&self) -> &PrefixMap {
        &self.core.prefixes
    }

    /// Requested output variables.
    pub fn vars(&self) -> &Arc<VarSet> {
        self.core.vars()
    }

    /// Access the sink (e.g. to drain a collector in tests).
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.core.sink
    }

    /// Consume the parser, returning its sink.
    pub fn into_sink(self) -> S {
        self.core.sink
    }

    /// Restore the parser to its initial state for a fresh stream, keeping
    /// the sink, role, and options.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.tokenizer = Tokenizer::new(self.format);
        self.core.batch = Some(RowBatch::new(
            Arc::clone(&self.core.vars),
            self.core.options.batch_rows,
        ));
        self.core.prefixes = PrefixMap::new();
        self.core.outbound.clear();
        self.core.eager = false;
        self.core.peer_terminated = false;
        self.core.terminated = false;
        self.core.completion = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out_vars(names: &[&str]) -> VarSet {
        VarSet::new(names.iter().copied().map(Arc::<str>::from))
    }

    #[test]
    fn test_projection_reorders_columns() {
        let out = out_vars(&["a", "b"]);
        let proj = Projection::new(&["b", "a", "c"], &out);
        assert_eq!(proj.width(), 3);
        assert_eq!(proj.output_column(0), Some(1)); // b -> col 1
        assert_eq!(proj.output_column(1), Some(0)); // a -> col 0
        assert_eq!(proj.output_column(2), None); // c dropped
    }

    #[test]
    fn test_projection_missing_requested_var() {
        let out = out_vars(&["a", "x"]);
        let proj = Projection::new(&["a"], &out);
        assert_eq!(proj.output_column(0), Some(0));
        // x never appears in input; nothing maps to output column 1.
        assert!((0..proj.width()).all(|w| proj.output_column(w) != Some(1)));
    }

    #[test]
    fn test_projection_reserves_seq_column() {
        let out = out_vars(&["a"]);
        let proj = Projection::new(&[fedstream_protocol::SEQ_VAR, "a"], &out);
        assert!(proj.has_seq());
        assert!(proj.is_seq_column(0));
        assert_eq!(proj.output_column(0), None);
        assert_eq!(proj.output_column(1), Some(0));
    }
}
