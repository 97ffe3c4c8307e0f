//! Session configuration.

use fedstream_protocol::Credit;
use fedstream_results::ParserOptions;
use fedstream_tabular::{DEFAULT_BATCH_ROWS, RowBatch};
use tokio::sync::mpsc;

/// Tuning for one join session over a duplex channel.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Row capacity of result batches handed downstream.
    pub batch_rows: usize,
    /// Capacity of the outbound frame channel between sender and transport.
    pub frame_channel_capacity: usize,
    /// Credit a server grants with its first `!bind-request`.
    pub initial_credit: u64,
    /// Answer `!ping` automatically with `!ping-ack`.
    pub auto_ping_ack: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_rows: DEFAULT_BATCH_ROWS,
            frame_channel_capacity: 64,
            initial_credit: 256,
            auto_ping_ack: true,
        }
    }
}

impl SessionConfig {
    pub fn with_batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows;
        self
    }

    pub fn with_initial_credit(mut self, initial_credit: u64) -> Self {
        self.initial_credit = initial_credit;
        self
    }

    pub fn with_auto_ping_ack(mut self, auto_ping_ack: bool) -> Self {
        self.auto_ping_ack = auto_ping_ack;
        self
    }

    /// Options for the result parser of this session.
    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            batch_rows: self.batch_rows,
            auto_ping_ack: self.auto_ping_ack,
        }
    }

    /// The outbound frame channel between the sender task and the transport.
    pub fn frame_channel(&self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(self.frame_channel_capacity)
    }

    /// The channel feeding binding batches into the sender task.
    pub fn binding_channel(&self) -> (mpsc::Sender<RowBatch>, mpsc::Receiver<RowBatch>) {
        mpsc::channel(self.frame_channel_capacity)
    }

    /// The credit a serving side grants with its first `!bind-request`.
    pub fn initial_grant(&self) -> Credit {
        Credit::Limited(self.initial_credit)
    }
}
