//! The binding sender task.
//!
//! Runs independently of the result parser: one direction of the duplex
//! channel streams result rows in, this task streams binding rows out. It
//! blocks only when the credit gate is empty, waking on a peer grant or a
//! termination signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fedstream_protocol::{encode_sequence, Result, StreamError, SEQ_VAR};
use fedstream_tabular::{RowBatch, Term, VarSet};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::credit::CreditGate;
use crate::queue::SentBindings;
use crate::transport::FrameSink;

/// Sender lifecycle, observable through [`SenderHandle::phase`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindPhase {
    /// No credit has been granted yet; nothing sent beyond the header.
    AwaitingFirstRequest,
    /// Bindings are flowing under credit.
    Streaming,
    /// All bindings sent; the termination frame is going out.
    Draining,
    /// The task has exited.
    Done,
}

/// Streams locally-produced binding batches to the peer in tab-separated
/// form, tagged with rising sequence numbers, under credit-based pacing.
///
/// Every transmitted row is appended to the shared sent-bindings queue as it
/// is serialized, so the receiving side can correlate result rows against it.
/// Transmission order is preserved and the final `!end` frame is sent exactly
/// once, after all prior frames are queued.
pub struct BindingSender<F: FrameSink> {
    vars: Arc<VarSet>,
    bindings: mpsc::Receiver<RowBatch>,
    sink: F,
    queue: Arc<SentBindings>,
    credit: Arc<CreditGate>,
    /// Set by the parsing side when the peer already signaled termination;
    /// suppresses the best-effort cancel frame.
    peer_terminated: Arc<AtomicBool>,
}

/// Handle to a running sender task.
pub struct SenderHandle {
    task: JoinHandle<Result<u64>>,
    phase: watch::Receiver<BindPhase>,
    cancel: watch::Sender<bool>,
}

impl SenderHandle {
    /// Request the sender to stop (downstream cancellation). Unblocks a
    /// parked sender; a best-effort `!cancel` frame goes out unless the peer
    /// already terminated.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> BindPhase {
        *self.phase.borrow()
    }

    /// Wait for the task to exit; returns the number of bindings sent.
    pub async fn join(self) -> Result<u64> {
        self.task
            .await
            .map_err(|e| StreamError::Transport(format!("sender task failed: {}", e)))?
    }
}

impl<F: FrameSink + 'static> BindingSender<F> {
    /// `vars` is the binding source's column order; the reserved sequence
    /// variable is prepended on the wire.
    pub fn new(
        vars: Arc<VarSet>,
        bindings: mpsc::Receiver<RowBatch>,
        sink: F,
        queue: Arc<SentBindings>,
        credit: Arc<CreditGate>,
        peer_terminated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            vars,
            bindings,
            sink,
            queue,
            credit,
            peer_terminated,
        }
    }

    /// Spawn the sender task.
    pub fn start(self) -> SenderHandle {
        let (phase_tx, phase_rx) = watch::channel(BindPhase::AwaitingFirstRequest);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(phase_tx, cancel_rx));
        SenderHandle {
            task,
            phase: phase_rx,
            cancel: cancel_tx,
        }
    }

    async fn run(
        mut self,
        phase: watch::Sender<BindPhase>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<u64> {
        let result = self.run_inner(&phase, &mut cancel).await;
        let _ = phase.send(BindPhase::Done);
        result
    }

    async fn run_inner(
        &mut self,
        phase: &watch::Sender<BindPhase>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<u64> {
        match self.stream_bindings(phase, cancel).await? {
            Outcome::Completed(sent) => {
                let _ = phase.send(BindPhase::Draining);
                self.sink.send("!end\n".to_string()).await?;
                tracing::debug!(bindings = sent, "binding stream completed");
                Ok(sent)
            }
            Outcome::Cancelled(sent) => {
                if !self.peer_terminated.load(Ordering::Acquire) {
                    // Best effort: the transport may already be gone.
                    let _ = self.sink.send("!cancel\n".to_string()).await;
                }
                tracing::debug!(bindings = sent, "binding stream cancelled");
                Ok(sent)
            }
        }
    }

    async fn stream_bindings(
        &mut self,
        phase: &watch::Sender<BindPhase>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Outcome> {
        self.sink.send(self.header_line()).await?;

        let mut seq: u64 = 0;
        let mut streaming = false;
        loop {
            let batch = tokio::select! {
                _ = cancel.changed() => return Ok(Outcome::Cancelled(seq)),
                batch = self.bindings.recv() => match batch {
                    Some(batch) => batch,
                    None => return Ok(Outcome::Completed(seq)),
                },
            };
            for i in 0..batch.len() {
                let granted = tokio::select! {
                    _ = cancel.changed() => return Ok(Outcome::Cancelled(seq)),
                    granted = self.credit.acquire() => granted,
                };
                if !granted {
                    return Ok(Outcome::Cancelled(seq));
                }
                if !streaming {
                    streaming = true;
                    let _ = phase.send(BindPhase::Streaming);
                }
                let Some(row) = batch.row(i) else { continue };
                let line = serialize_row(seq, &row)?;
                // Queue before the frame can reach the peer, so a result row
                // can never reference a binding the queue does not hold.
                self.queue.push(seq, row);
                self.sink.send(line).await?;
                seq += 1;
            }
        }
    }

    fn header_line(&self) -> String {
        let mut line = String::new();
        line.push('?');
        line.push_str(SEQ_VAR);
        for name in self.vars.iter() {
            line.push('\t');
            line.push('?');
            line.push_str(name);
        }
        line.push('\n');
        line
    }
}

enum Outcome {
    Completed(u64),
    Cancelled(u64),
}

/// One binding row in tab-separated form: the quoted sequence literal first,
/// then the terms in binding column order (empty cell for unbound).
fn serialize_row(seq: u64, row: &[Option<Term>]) -> Result<String> {
    let mut line = String::new();
    line.push('"');
    line.push_str(&encode_sequence(seq)?);
    line.push('"');
    for term in row {
        line.push('\t');
        if let Some(term) = term {
            line.push_str(&term.to_string());
        }
    }
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedstream_protocol::{decode_sequence, Credit};
    use std::time::Duration;

    fn batch(vars: &Arc<VarSet>, rows: &[&[Option<Term>]]) -> RowBatch {
        let mut batch = RowBatch::new(Arc::clone(vars), rows.len().max(1));
        for row in rows {
            batch.begin_row();
            for (i, term) in row.iter().enumerate() {
                if let Some(term) = term {
                    batch.put_value(i, term.clone()).unwrap();
                }
            }
            batch.commit_row().unwrap();
        }
        batch
    }

    fn sender_setup() -> (
        Arc<VarSet>,
        mpsc::Sender<RowBatch>,
        mpsc::Receiver<String>,
        Arc<SentBindings>,
        Arc<CreditGate>,
        SenderHandle,
    ) {
        let vars = Arc::new(VarSet::new(["a", "b"]));
        let (batch_tx, batch_rx) = mpsc::channel(4);
        let (frame_tx, frame_rx) = mpsc::channel::<String>(64);
        let queue = Arc::new(SentBindings::new());
        let credit = Arc::new(CreditGate::new());
        let sender = BindingSender::new(
            Arc::clone(&vars),
            batch_rx,
            frame_tx,
            Arc::clone(&queue),
            Arc::clone(&credit),
            Arc::new(AtomicBool::new(false)),
        );
        let handle = sender.start();
        (vars, batch_tx, frame_rx, queue, credit, handle)
    }

    #[tokio::test]
    async fn test_header_then_rows_then_end() {
        let (vars, batch_tx, mut frames, queue, credit, handle) = sender_setup();
        credit.grant(Credit::All);

        batch_tx
            .send(batch(
                &vars,
                &[
                    &[Some(Term::iri("http://ex.org/1")), Some(Term::literal("x"))],
                    &[None, Some(Term::literal_lang("y", "en"))],
                ],
            ))
            .await
            .unwrap();
        drop(batch_tx);

        assert_eq!(handle.join().await.unwrap(), 2);

        let header = frames.recv().await.unwrap();
        assert_eq!(header, format!("?{}\t?a\t?b\n", SEQ_VAR));

        let row0 = frames.recv().await.unwrap();
        assert_eq!(
            row0,
            format!("\"{}\"\t<http://ex.org/1>\t\"x\"\n", encode_sequence(0).unwrap())
        );
        let row1 = frames.recv().await.unwrap();
        assert_eq!(row1, format!("\"{}\"\t\t\"y\"@en\n", encode_sequence(1).unwrap()));

        assert_eq!(frames.recv().await.as_deref(), Some("!end\n"));
        assert!(frames.recv().await.is_none());

        // Every transmitted row is in the queue, in order.
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head_seq(), Some(0));
    }

    #[tokio::test]
    async fn test_sender_parks_without_credit() {
        let (vars, batch_tx, mut frames, _queue, credit, handle) = sender_setup();
        batch_tx
            .send(batch(&vars, &[&[Some(Term::literal("1")), None]]))
            .await
            .unwrap();

        // Header goes out immediately; the row must wait for credit.
        let header = frames.recv().await.unwrap();
        assert!(header.starts_with('?'));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(frames.try_recv().is_err());
        assert_eq!(handle.phase(), BindPhase::AwaitingFirstRequest);

        credit.grant(Credit::Limited(1));
        let row = frames.recv().await.unwrap();
        assert!(row.starts_with('"'));

        drop(batch_tx);
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_credit_is_consumed_per_row() {
        let (vars, batch_tx, mut frames, _queue, credit, handle) = sender_setup();
        credit.grant(Credit::Limited(2));

        batch_tx
            .send(batch(
                &vars,
                &[
                    &[Some(Term::literal("1")), None],
                    &[Some(Term::literal("2")), None],
                    &[Some(Term::literal("3")), None],
                ],
            ))
            .await
            .unwrap();

        let _header = frames.recv().await.unwrap();
        let _row0 = frames.recv().await.unwrap();
        let _row1 = frames.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Third row is parked on the exhausted gate.
        assert!(frames.try_recv().is_err());

        credit.grant(Credit::Limited(1));
        let row2 = frames.recv().await.unwrap();
        assert!(decode_sequence(row2.split('\t').next().unwrap().trim_matches('"')).is_ok());

        drop(batch_tx);
        assert_eq!(handle.join().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancel_sends_best_effort_cancel_frame() {
        let (vars, batch_tx, mut frames, _queue, _credit, handle) = sender_setup();
        batch_tx
            .send(batch(&vars, &[&[Some(Term::literal("1")), None]]))
            .await
            .unwrap();
        let _header = frames.recv().await.unwrap();

        // No credit ever arrives; cancellation must unblock the parked task.
        handle.cancel();
        let sent = handle.join().await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(frames.recv().await.as_deref(), Some("!cancel\n"));
    }

    #[tokio::test]
    async fn test_no_cancel_frame_after_peer_termination() {
        let vars = Arc::new(VarSet::new(["a"]));
        let (_batch_tx, batch_rx) = mpsc::channel::<RowBatch>(1);
        let (frame_tx, mut frames) = mpsc::channel::<String>(8);
        let peer_terminated = Arc::new(AtomicBool::new(true));
        let sender = BindingSender::new(
            Arc::clone(&vars),
            batch_rx,
            frame_tx,
            Arc::new(SentBindings::new()),
            Arc::new(CreditGate::new()),
            Arc::clone(&peer_terminated),
        );
        let handle = sender.start();
        let _header = frames.recv().await.unwrap();
        handle.cancel();
        handle.join().await.unwrap();
        // Channel closes without a !cancel frame.
        assert!(frames.recv().await.is_none());
    }

    #[test]
    fn test_serialize_row_shapes() {
        let line = serialize_row(4096, &[Some(Term::literal("a\tb"))]).unwrap();
        // Escaped tab keeps the column count stable.
        assert_eq!(line.matches('\t').count(), 1);
        assert!(line.ends_with('\n'));
    }
}
