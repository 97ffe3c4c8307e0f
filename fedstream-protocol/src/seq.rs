//! Binding sequence number codec.
//!
//! A binding sequence number identifies the position of a binding row within
//! the total stream of bindings sent for one join execution. It travels inline
//! through the result stream as a short quoted string literal in the reserved
//! sequence column, so it must stay syntactically valid in every host format
//! and must not grow typical rows.
//!
//! Encoding uses a 64-symbol alphabet, most significant symbol first:
//!
//! - values below 4096 pack into **2 symbols** (12 bits)
//! - larger values use **8 symbols** (48 bits)
//!
//! Decoding any other literal length is a protocol error, which doubles as
//! corruption detection for the reserved column.

use crate::error::{Result, StreamError};

/// The 64-symbol alphabet. Chosen so every symbol is safe inside a quoted
/// literal in TSV, CSV, and JSON without escaping.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Symbol count of the short form.
const SHORT_LEN: usize = 2;
/// Symbol count of the long form.
const LONG_LEN: usize = 8;
/// First value that needs the long form.
const SHORT_LIMIT: u64 = 1 << (6 * SHORT_LEN as u32);

/// Largest encodable sequence number (48 bits).
pub const MAX_SEQUENCE: u64 = (1 << (6 * LONG_LEN as u32)) - 1;

fn symbol_value(byte: u8) -> Option<u64> {
    match byte {
        b'A'..=b'Z' => Some((byte - b'A') as u64),
        b'a'..=b'z' => Some((byte - b'a') as u64 + 26),
        b'0'..=b'9' => Some((byte - b'0') as u64 + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// Encode a sequence number into its literal form.
pub fn encode_sequence(seq: u64) -> Result<String> {
    if seq > MAX_SEQUENCE {
        return Err(StreamError::violation(format!(
            "Binding sequence {} exceeds the 48-bit wire limit",
            seq
        )));
    }
    let len = if seq < SHORT_LIMIT { SHORT_LEN } else { LONG_LEN };
    let mut out = vec![0u8; len];
    let mut rest = seq;
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(rest & 0x3f) as usize];
        rest >>= 6;
    }
    Ok(out.iter().map(|&b| b as char).collect())
}

/// Decode a sequence literal back into the sequence number.
///
/// The literal must be exactly 2 or 8 symbols of the alphabet; anything else
/// is a protocol error.
pub fn decode_sequence(literal: &str) -> Result<u64> {
    let bytes = literal.as_bytes();
    if bytes.len() != SHORT_LEN && bytes.len() != LONG_LEN {
        return Err(StreamError::violation(format!(
            "Binding sequence literal has length {} (expected {} or {})",
            bytes.len(),
            SHORT_LEN,
            LONG_LEN
        )));
    }
    let mut value: u64 = 0;
    for &b in bytes {
        let sym = symbol_value(b).ok_or_else(|| {
            StreamError::violation(format!(
                "Invalid symbol {:?} in binding sequence literal",
                b as char
            ))
        })?;
        value = (value << 6) | sym;
    }
    Ok(value)
}
