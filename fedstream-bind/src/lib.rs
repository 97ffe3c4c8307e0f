//! Binding correlation and flow control for streaming joins.
//!
//! This crate implements the client side of a pipelined join against a remote
//! endpoint over one duplex channel: a **sender task** pushes locally-produced
//! binding rows upstream under credit-based flow control, while the result
//! parser (running independently in the other direction) hands every observed
//! binding sequence number to a **correlator** that reconciles it against the
//! queue of in-flight bindings.
//!
//! # Guarantees
//!
//! - Transmission order of bindings is preserved, and the terminating frame is
//!   sent exactly once after every prior frame is queued
//! - For `k` bindings sent, exactly `k` notifications (empty or non-empty)
//!   fire, in sequence order, even when the stream ends early
//! - A sequence number below the last resolved one is a protocol violation
//!   and stops the stream
//!
//! The only state shared between the sender task and the parsing task is the
//! sent-bindings queue and the credit gate; both hide their locking behind
//! O(1) operations.

pub mod config;
pub mod credit;
pub mod join;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use config::SessionConfig;
pub use credit::CreditGate;
pub use join::{BindType, JoinObserver};
pub use queue::{BindingRow, SentBindings};
pub use receiver::{BindNotify, JoinCorrelator};
pub use sender::{BindPhase, BindingSender, SenderHandle};
pub use transport::FrameSink;
