//! Incremental SPARQL result-stream parsing.
//!
//! This crate parses a result stream arriving as arbitrary byte chunks over a
//! persistent text channel, in any of three serializations (tab-separated,
//! comma-separated, or the streaming JSON dialect), without ever requiring the
//! full message in memory.
//!
//! ## Design
//!
//! Incremental parsing here is non-trivial because:
//! - chunk boundaries can fall anywhere, including inside a quoted literal or
//!   a JSON string escape, so every scan must be able to suspend and resume
//! - a `!`-prefixed control vocabulary (termination, errors, pings, prefix
//!   declarations, binding flow control) is multiplexed into the same byte
//!   stream as row data
//! - completed rows are handed downstream in pooled batches, with the
//!   consumer recycling empty batches back to the parser
//!
//! The engine is push-based: the transport calls [`ResultParser::feed`] with
//! each chunk, then exactly one of [`ResultParser::end`] or
//! [`ResultParser::fail`]. Errors never cross the `feed` boundary; every
//! terminal outcome is reported once through [`ResultParser::completion`].
//!
//! Tokenizers are hand-rolled state machines rather than combinator parsers:
//! suspension across chunk boundaries only requires retaining the unconsumed
//! byte tail plus small index-addressable state, never continuation capture.

pub mod delim;
pub mod json;
pub mod parser;
pub mod role;

pub use parser::{Completion, ParserOptions, Projection, ResultParser};
pub use role::ParserRole;

/// Negotiated result serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultFormat {
    /// Tab-separated values, `\n`-terminated lines, Turtle-style terms.
    Tsv,
    /// Comma-separated values, `\r\n`-terminated records, RFC 4180 quoting.
    Csv,
    /// The streaming SPARQL JSON results dialect.
    Json,
}
