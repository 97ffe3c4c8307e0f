//! Tabular row batch types for fedstream.
//!
//! This crate provides the value model and the pooled columnar batch container
//! shared by the result-stream parser and the binding sender:
//!
//! - **`Term`**: an opaque RDF value (IRI, blank node, or literal), cheap to
//!   clone (`Arc`-backed strings)
//! - **`VarSet`**: an ordered, deduplicated set of output variable names
//! - **`RowBatch`**: a size-bounded columnar batch of rows, appended through an
//!   explicit begin/put/commit/abort row protocol
//! - **`BatchSink`**: the downstream handoff contract, which recycles batches
//!   back to the producer
//!
//! # Design
//!
//! - **Columnar storage**: each output variable owns a `Vec<Option<Term>>`
//! - **Row commit protocol**: a row started but never committed (end-of-stream,
//!   parse error) is discarded without ever reaching a consumer
//! - **Pooling**: `offer` hands a full batch downstream and receives an empty
//!   batch for reuse, so steady-state parsing does not allocate per batch

pub mod batch;
pub mod error;
pub mod sink;
pub mod term;
pub mod vars;

pub use batch::RowBatch;
pub use error::{Result, TabularError};
pub use sink::{BatchSink, CollectSink, SinkReply};
pub use term::{Term, WellKnownDatatypes};
pub use vars::VarSet;

/// Default row capacity for a batch when the caller does not configure one.
pub const DEFAULT_BATCH_ROWS: usize = 1024;
