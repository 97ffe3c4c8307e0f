//! The transport boundary.
//!
//! The underlying duplex channel (WebSocket or similar) is an external
//! collaborator; the sender only needs a place to push opaque text frames.
//! Connection management, TLS, and timeouts all live behind this trait.

use async_trait::async_trait;
use fedstream_protocol::{Result, StreamError};
use tokio::sync::mpsc;

/// Outbound half of the duplex channel.
#[async_trait]
pub trait FrameSink: Send {
    /// Queue one text frame for transmission, in order.
    async fn send(&mut self, frame: String) -> Result<()>;
}

/// In-memory transport for tests and local wiring: frames land on a tokio
/// channel the "peer" drains.
#[async_trait]
impl FrameSink for mpsc::Sender<String> {
    async fn send(&mut self, frame: String) -> Result<()> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| StreamError::Transport("frame channel closed".to_string()))
    }
}
