//! # Packet Framer
//!
//! Extracts complete packets from a byte stream whose chunk boundaries are
//! arbitrary (BLE notifications, serial reads, RFCOMM reads).
//!
//! ## Scanning Rules
//!
//! ```text
//!  noise    marker  len                       marker  len (incomplete)
//! ┌──────┬─────────┬───┬──────────────────┬─────────┬───┬────┐
//! │ 0x13 │ 55 55 … │ n │ … checksum AA AA │ 55 55 … │ m │ …  │
//! └──────┴─────────┴───┴──────────────────┴─────────┴───┴────┘
//!  dropped           emitted as Packet       kept as the carry-over buffer
//! ```
//!
//! 1. Find the next `55 55` marker. Bytes before it are noise and dropped.
//! 2. Read the length byte; the full span is `len + 7` bytes.
//! 3. Fewer bytes than that: stop, everything from the marker is retained.
//! 4. Validate the span. Valid spans become packets. An invalid span is
//!    counted and logged, its marker is dropped, and scanning resumes right
//!    after that marker, so a corrupt length byte cannot hide the packets
//!    that follow.
//!
//! Every decision is taken on a span that is fully present, so the output
//! does not depend on where the chunk boundaries fell.
//!
//! Bytes with no marker at all are retained (the marker itself may be split
//! across two chunks). Once they exceed the configured maximum the channel
//! is considered corrupt and [`NiimlinkError::FramerOverflow`] is returned.
//!
//! ## Example
//!
//! ```
//! use niimlink::protocol::{Packet, PacketFramer};
//!
//! let bytes = Packet::new(0x40, vec![0x01])?.to_bytes();
//! let mut framer = PacketFramer::new(4096);
//!
//! assert!(framer.push(&bytes[..3])?.is_empty());
//! let packets = framer.push(&bytes[3..])?;
//! assert_eq!(packets.len(), 1);
//! assert_eq!(packets[0].command(), 0x40);
//! # Ok::<(), niimlink::NiimlinkError>(())
//! ```

use tracing::{debug, warn};

use super::packet::{HEAD, MIN_PACKET_LEN, Packet};
use crate::error::{NiimlinkError, Result};

/// Result of one pass over a buffer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrameOutput {
    /// Packets in arrival order
    pub packets: Vec<Packet>,
    /// Bytes at the front of the buffer that may be dropped
    pub consumed: usize,
    /// Spans that failed validation during this pass
    pub decode_errors: usize,
}

/// Stateless extraction pass.
///
/// `buffer[output.consumed..]` is the tail the caller keeps for the next
/// call.
pub fn extract(buffer: &[u8], max_buffer: usize) -> Result<FrameOutput> {
    let mut output = FrameOutput::default();
    let mut pos = 0;

    loop {
        let rest = &buffer[pos..];
        let Some(offset) = find_marker(rest) else {
            if rest.len() > max_buffer {
                return Err(NiimlinkError::FramerOverflow {
                    len: rest.len(),
                    max: max_buffer,
                });
            }
            break;
        };

        if offset > 0 {
            debug!(skipped = offset, "dropping bytes before packet marker");
            pos += offset;
        }

        let rest = &buffer[pos..];
        if rest.len() < 4 {
            break;
        }

        let total = rest[3] as usize + MIN_PACKET_LEN;
        if rest.len() < total {
            break;
        }

        match Packet::from_bytes(&rest[..total]) {
            Ok(packet) => {
                output.packets.push(packet);
                pos += total;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    span = %hex::encode(&rest[..total]),
                    "discarding malformed packet"
                );
                output.decode_errors += 1;
                // The length byte itself may be the corrupt one, so the
                // declared span can swallow valid packets. Resync after the marker.
                pos += HEAD.len();
            }
        }
    }

    output.consumed = pos;
    Ok(output)
}

fn find_marker(data: &[u8]) -> Option<usize> {
    data.windows(HEAD.len()).position(|window| window == HEAD)
}

/// # Streaming Framer
///
/// Owns the carry-over buffer between calls to [`extract`].
#[derive(Debug)]
pub struct PacketFramer {
    buffer: Vec<u8>,
    max_buffer: usize,
    decode_errors: u64,
}

impl PacketFramer {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer,
            decode_errors: 0,
        }
    }

    /// Append newly received bytes and return every packet they complete.
    ///
    /// ## Errors
    ///
    /// [`NiimlinkError::FramerOverflow`] when the retained bytes exceed the
    /// limit without a marker. The buffer is cleared in that case.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Packet>> {
        self.buffer.extend_from_slice(bytes);

        match extract(&self.buffer, self.max_buffer) {
            Ok(output) => {
                self.buffer.drain(..output.consumed);
                self.decode_errors += output.decode_errors as u64;
                Ok(output.packets)
            }
            Err(err) => {
                self.buffer.clear();
                Err(err)
            }
        }
    }

    /// Bytes waiting for the rest of their packet
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Malformed spans dropped since creation
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
