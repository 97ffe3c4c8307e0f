//! Wire protocol types for fedstream.
//!
//! This crate defines the contract both ends of the duplex result channel
//! share:
//!
//! - **Control frames**: the `!`-prefixed line vocabulary multiplexed into the
//!   row stream (termination, errors, pings, prefix declarations, binding
//!   flow control)
//! - **Sequence codec**: the compact 64-symbol encoding that lets a binding
//!   sequence number ride through a quoted literal column
//! - **Prefix map**: the mutable prefix → IRI table extended by `!prefix`
//! - **Error taxonomy**: the single `StreamError` type every terminal path
//!   reports through
//!
//! # Protocol Overview
//!
//! A result stream is line-oriented UTF-8 text. Any line whose first byte is
//! `!` at row start is a control frame; everything else is header or row data
//! in the negotiated format. Binding rows pushed upstream carry a rising
//! sequence number in a reserved column, paced by `!bind-request` credit
//! grants from the peer.

pub mod control;
pub mod error;
pub mod prefix;
pub mod seq;

pub use control::{BindDelegate, ControlFrame, Credit, NoBindCommands};
pub use error::{Result, StreamError};
pub use prefix::PrefixMap;
pub use seq::{decode_sequence, encode_sequence, MAX_SEQUENCE};

/// Reserved variable name carrying the binding sequence number.
///
/// Never projected into caller-visible output columns.
pub const SEQ_VAR: &str = "__fs_seq";

/// Wire spelling of the unbounded credit grant.
pub const CREDIT_ALL: &str = "MAX";
