//! # Printer Protocol Framing
//!
//! Just enough of the printer's byte protocol to find packet boundaries in a
//! raw stream and to put a packet on the wire. Command semantics belong to
//! the layer above.
//!
//! ## Module Structure
//!
//! - [`packet`]: Packet value, wire layout and checksum
//! - [`framer`]: Streaming extraction of packets from fragmented input
//!
//! ## Usage Example
//!
//! ```
//! use niimlink::protocol::{Packet, PacketFramer};
//!
//! let mut stream = Packet::new(0x01, vec![0x01])?.to_bytes();
//! stream.extend(Packet::new(0x02, vec![])?.to_bytes());
//!
//! let mut framer = PacketFramer::new(4096);
//! let packets = framer.push(&stream)?;
//! assert_eq!(packets.len(), 2);
//! # Ok::<(), niimlink::NiimlinkError>(())
//! ```

pub mod framer;
pub mod packet;

pub use framer::{FrameOutput, PacketFramer, extract};
pub use packet::{Packet, checksum};
