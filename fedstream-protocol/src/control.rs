//! Control-frame vocabulary.
//!
//! Control frames are `!`-prefixed lines multiplexed into the row stream.
//! They are only recognized at row start (column zero); a `!` anywhere else is
//! ordinary data. Keywords are matched case-sensitively.

use std::fmt;

use crate::error::{Result, StreamError};
use crate::CREDIT_ALL;

/// Credit granted by a `!bind-request` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Credit {
    /// Permission to send this many more binding rows.
    Limited(u64),
    /// Send everything eagerly (wire spelling `MAX`).
    All,
}

impl Credit {
    /// The numeric amount, with `All` saturating to `u64::MAX`.
    pub fn amount(self) -> u64 {
        match self {
            Credit::Limited(n) => n,
            Credit::All => u64::MAX,
        }
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credit::Limited(n) => write!(f, "{}", n),
            Credit::All => f.write_str(CREDIT_ALL),
        }
    }
}

/// A parsed control frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    /// Clean termination; must be the last line of the stream.
    End,
    /// Abort request.
    Cancel,
    /// Abort acknowledgment.
    Cancelled,
    /// Terminal error with a free-text message.
    Error(String),
    /// Prefix declaration extending the stream's prefix map.
    Prefix { name: String, iri: String },
    /// Liveness probe.
    Ping,
    /// Liveness response.
    PingAck,
    /// Informational text; logged, no semantic effect.
    Info(String),
    /// Credit grant for the binding sender.
    BindRequest(Credit),
    /// All bindings up to and including `seq` have no matching rows.
    BindEmptyStreak(u64),
    /// Declares the binding context for subsequent rows.
    ActiveBinding(u64),
}

impl ControlFrame {
    /// Parse one control line (without its terminator). The line must start
    /// with `!`; an unrecognized keyword is a malformed-input error carrying
    /// the caller's line number.
    pub fn parse(line: &str, line_number: u64) -> Result<ControlFrame> {
        debug_assert!(line.starts_with('!'));
        let (keyword, payload) = match line.find(' ') {
            Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
            None => (line, None),
        };
        match (keyword, payload) {
            ("!end", None) => Ok(ControlFrame::End),
            ("!cancel", None) => Ok(ControlFrame::Cancel),
            ("!cancelled", None) => Ok(ControlFrame::Cancelled),
            ("!ping", None) => Ok(ControlFrame::Ping),
            ("!ping-ack", None) => Ok(ControlFrame::PingAck),
            ("!error", payload) => Ok(ControlFrame::Error(
                payload.unwrap_or_default().to_string(),
            )),
            ("!info", payload) => Ok(ControlFrame::Info(payload.unwrap_or_default().to_string())),
            ("!prefix", Some(payload)) => parse_prefix(payload, line_number),
            ("!bind-request", Some(payload)) => parse_bind_request(payload, line_number),
            ("!bind-empty-streak", Some(payload)) => {
                parse_seq_payload(payload, line_number).map(ControlFrame::BindEmptyStreak)
            }
            ("!active-binding", Some(payload)) => {
                parse_seq_payload(payload, line_number).map(ControlFrame::ActiveBinding)
            }
            _ => Err(StreamError::malformed(
                line_number,
                1,
                format!("Unrecognized control command {:?}", keyword),
            )),
        }
    }
}

fn parse_prefix(payload: &str, line_number: u64) -> Result<ControlFrame> {
    let (name, iri) = payload.split_once(':').ok_or_else(|| {
        StreamError::malformed(line_number, 1, "Prefix declaration missing ':'")
    })?;
    if iri.is_empty() {
        return Err(StreamError::malformed(
            line_number,
            1,
            "Prefix declaration missing IRI",
        ));
    }
    Ok(ControlFrame::Prefix {
        name: name.to_string(),
        iri: iri.to_string(),
    })
}

fn parse_bind_request(payload: &str, line_number: u64) -> Result<ControlFrame> {
    if payload == CREDIT_ALL {
        return Ok(ControlFrame::BindRequest(Credit::All));
    }
    let n: u64 = payload.parse().map_err(|_| {
        StreamError::malformed(
            line_number,
            1,
            format!("Invalid bind-request credit {:?}", payload),
        )
    })?;
    Ok(ControlFrame::BindRequest(Credit::Limited(n)))
}

fn parse_seq_payload(payload: &str, line_number: u64) -> Result<u64> {
    payload.parse().map_err(|_| {
        StreamError::malformed(
            line_number,
            1,
            format!("Invalid sequence number {:?}", payload),
        )
    })
}

impl fmt::Display for ControlFrame {
    /// Renders the wire form of the frame, without a line terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlFrame::End => f.write_str("!end"),
            ControlFrame::Cancel => f.write_str("!cancel"),
            ControlFrame::Cancelled => f.write_str("!cancelled"),
            ControlFrame::Error(msg) => write!(f, "!error {}", msg),
            ControlFrame::Prefix { name, iri } => write!(f, "!prefix {}:{}", name, iri),
            ControlFrame::Ping => f.write_str("!ping"),
            ControlFrame::PingAck => f.write_str("!ping-ack"),
            ControlFrame::Info(text) => write!(f, "!info {}", text),
            ControlFrame::BindRequest(credit) => write!(f, "!bind-request {}", credit),
            ControlFrame::BindEmptyStreak(seq) => write!(f, "!bind-empty-streak {}", seq),
            ControlFrame::ActiveBinding(seq) => write!(f, "!active-binding {}", seq),
        }
    }
}

/// Role-specific handling of the binding-flow commands.
///
/// A result-stream parser is shared between the binding-sender side (a client
/// receiving `!bind-request` grants) and the binding-receiver side (a server
/// receiving rows and observing `!bind-empty-streak`). The base parser does
/// not know which side it serves; it delegates the three flow commands here.
/// A command the installed delegate does not claim is a protocol violation.
pub trait BindDelegate {
    /// Peer granted credit to send more bindings.
    fn on_bind_request(&mut self, credit: Credit) -> Result<()> {
        let _ = credit;
        Err(StreamError::violation(
            "Unexpected !bind-request for this role",
        ))
    }

    /// Peer declared all bindings up to `seq` empty, with no row data.
    fn on_bind_empty_streak(&mut self, seq: u64) -> Result<()> {
        let _ = seq;
        Err(StreamError::violation(
            "Unexpected !bind-empty-streak for this role",
        ))
    }

    /// Peer declared the binding context for subsequent rows.
    fn on_active_binding(&mut self, seq: u64) -> Result<()> {
        let _ = seq;
        Err(StreamError::violation(
            "Unexpected !active-binding for this role",
        ))
    }
}

/// Delegate for plain (non-join) result streams: every binding-flow command is
/// a protocol violation.
#[derive(Debug, Default)]
pub struct NoBindCommands;

impl BindDelegate for NoBindCommands {}
