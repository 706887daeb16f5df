//! # Protocol Packet
//!
//! One complete, checksum-validated unit exchanged with the printer.
//!
//! ## Wire Layout
//!
//! ```text
//! ┌──────┬──────┬─────┬─────┬──────────────┬──────────┬──────┬──────┐
//! │ 0x55 │ 0x55 │ cmd │ len │ payload[len] │ checksum │ 0xAA │ 0xAA │
//! └──────┴──────┴─────┴─────┴──────────────┴──────────┴──────┴──────┘
//!   head          u8    u8                   u8          tail
//! ```
//!
//! The checksum is the XOR of `cmd`, `len` and every payload byte. The
//! shortest possible packet (empty payload) is 7 bytes.
//!
//! ## Example
//!
//! ```
//! use niimlink::protocol::Packet;
//!
//! let packet = Packet::new(0x40, vec![0x01])?;
//! assert_eq!(packet.to_bytes(), vec![0x55, 0x55, 0x40, 0x01, 0x01, 0x40, 0xAA, 0xAA]);
//! # Ok::<(), niimlink::NiimlinkError>(())
//! ```

use serde::Serialize;

use crate::error::{NiimlinkError, Result};

/// Packet start marker
pub const HEAD: [u8; 2] = [0x55, 0x55];

/// Packet end marker
pub const TAIL: [u8; 2] = [0xAA, 0xAA];

/// Bytes a packet occupies besides its payload (head, cmd, len, checksum, tail)
pub const MIN_PACKET_LEN: usize = 7;

/// Largest payload the one-byte length field can describe
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    command: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet for sending.
    ///
    /// ## Errors
    ///
    /// Fails if the payload does not fit the one-byte length field.
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(NiimlinkError::EncodeConstraint(format!(
                "payload of {} bytes exceeds {} bytes",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        Ok(Self { command, payload })
    }

    /// Parse exactly one packet occupying the whole of `span`.
    ///
    /// ## Errors
    ///
    /// Returns [`NiimlinkError::FrameDecode`] when the head, declared length,
    /// checksum or tail does not match.
    pub fn from_bytes(span: &[u8]) -> Result<Self> {
        if span.len() < MIN_PACKET_LEN {
            return Err(NiimlinkError::FrameDecode(format!(
                "{} bytes is shorter than the minimal packet",
                span.len()
            )));
        }
        if span[..2] != HEAD {
            return Err(NiimlinkError::FrameDecode("missing packet head".into()));
        }

        let command = span[2];
        let len = span[3] as usize;
        if span.len() != len + MIN_PACKET_LEN {
            return Err(NiimlinkError::FrameDecode(format!(
                "declared payload {} does not match span of {} bytes",
                len,
                span.len()
            )));
        }

        let payload = &span[4..4 + len];
        let expected = checksum(command, payload);
        let actual = span[4 + len];
        if actual != expected {
            return Err(NiimlinkError::FrameDecode(format!(
                "checksum mismatch: expected {:#04x}, got {:#04x}",
                expected, actual
            )));
        }
        if span[5 + len..] != TAIL {
            return Err(NiimlinkError::FrameDecode("missing packet tail".into()));
        }

        Ok(Self {
            command,
            payload: payload.to_vec(),
        })
    }

    #[inline]
    pub fn command(&self) -> u8 {
        self.command
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + MIN_PACKET_LEN);
        out.extend_from_slice(&HEAD);
        out.push(self.command);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        out.push(checksum(self.command, &self.payload));
        out.extend_from_slice(&TAIL);
        out
    }
}

/// XOR integrity byte over command, length and payload.
pub fn checksum(command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command ^ payload.len() as u8, |acc, b| acc ^ b)
}
