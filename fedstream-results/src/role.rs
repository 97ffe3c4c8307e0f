//! Role-specific parser behavior.
//!
//! The same base parser serves both sides of a join execution: the side that
//! sends bindings and reads correlated result rows, and the side that reads
//! bindings and sends result rows. The base state machine (control
//! multiplexing, row and batch lifecycle) does not know which side it serves;
//! everything role-specific funnels through this trait.

use fedstream_protocol::{BindDelegate, NoBindCommands, Result, StreamError};
use fedstream_tabular::Term;

/// Values to pre-fill into the row under construction, as
/// `(output column, term)` pairs. Pre-filled slots lose to values parsed from
/// the wire for the same column.
pub type Prefill = Vec<(usize, Term)>;

/// Role hooks invoked by the parser around rows and stream termination.
///
/// The binding-flow control commands come in through the [`BindDelegate`]
/// supertrait; the row hooks below carry the correlation side of the
/// protocol. Plain (non-join) streams use [`NoBindCommands`], which rejects
/// the flow commands and ignores the row hooks.
pub trait ParserRole: BindDelegate + Send {
    /// A data row is starting. Returns values to pre-fill from the active
    /// binding context, if any.
    fn on_row_begin(&mut self) -> Result<Prefill> {
        Ok(Vec::new())
    }

    /// The reserved sequence column of the current row carried `seq`.
    /// Returns the resolved binding row's values to pre-fill.
    fn on_sequence(&mut self, seq: u64) -> Result<Prefill> {
        let _ = seq;
        Err(StreamError::violation(
            "Unexpected binding sequence column for this role",
        ))
    }

    /// The stream ended cleanly. Outstanding bindings resolve as empty here.
    fn on_clean_end(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ParserRole for NoBindCommands {}
