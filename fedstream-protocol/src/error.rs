//! The unified error taxonomy for stream parsing and binding correlation.
//!
//! Every terminal path (syntax error, protocol violation, peer signal,
//! transport failure) converges on one `StreamError` value delivered exactly
//! once through the completion channel. Parse errors are never surfaced as
//! panics or return values of `feed`.

use fedstream_tabular::TabularError;
use thiserror::Error;

/// Terminal stream errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Syntax violation in the result stream: bad header, bad term, column
    /// count mismatch, bad control command, data after `!end`.
    #[error("Malformed input at line {line}, column {column}: {message}")]
    MalformedInput {
        /// 1-based line of the offending byte.
        line: u64,
        /// 1-based column of the offending byte.
        column: u64,
        message: String,
    },

    /// The peer broke a protocol invariant: out-of-order sequence number,
    /// binding referenced before being sent, command unexpected in this state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer reported an error via `!error <msg>`.
    #[error("Peer error: {0}")]
    PeerError(String),

    /// The peer aborted via `!cancel`.
    #[error("Peer cancelled the stream")]
    PeerCancelled,

    /// I/O failure in the underlying transport, delivered via `fail`.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Batch construction error.
    #[error(transparent)]
    Tabular(#[from] TabularError),
}

impl StreamError {
    /// Create a malformed-input error with positional context.
    pub fn malformed(line: u64, column: u64, message: impl Into<String>) -> Self {
        StreamError::MalformedInput {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a protocol-violation error.
    pub fn violation(message: impl Into<String>) -> Self {
        StreamError::ProtocolViolation(message.into())
    }

    /// True when the other side reported the problem (as opposed to local
    /// detection), so callers can tell "we found a bug" from "they did".
    pub fn is_peer_signaled(&self) -> bool {
        matches!(self, StreamError::PeerError(_) | StreamError::PeerCancelled)
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, StreamError>;
