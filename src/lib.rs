//! # Niimlink - Label Printer Link Library
//!
//! Niimlink carries protocol packets between a host and a thermal label
//! printer, and turns images into the printer's row format. It provides:
//!
//! - **Framing**: packet encoding and a streaming extractor for received bytes
//! - **Transports**: BLE, serial and classic Bluetooth (RFCOMM) links behind
//!   one trait
//! - **Send discipline**: one write at a time, spaced by a minimum interval
//! - **Raster encoding**: 1 bit per dot rows with repeat compression
//!
//! ## Quick Start
//!
//! ```no_run
//! use niimlink::{
//!     config::LinkConfig,
//!     protocol::Packet,
//!     session::Session,
//!     transport::{self, TransportKind},
//! };
//!
//! # async fn example() -> Result<(), niimlink::NiimlinkError> {
//! let link = transport::open(TransportKind::Serial, "/dev/ttyACM0", LinkConfig::DEFAULT);
//! let mut session = Session::open(link).await?;
//!
//! session.send_packet(&Packet::new(0x40, vec![0x01])?, false).await?;
//! if let Some(reply) = session.next_packet().await? {
//!     println!("reply 0x{:02X}: {:02X?}", reply.command(), reply.payload());
//! }
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Packet value and stream framer |
//! | [`transport`] | Link variants and the exclusive send channel |
//! | [`raster`] | Image input and row encoder |
//! | [`session`] | Single-transport owner for the protocol layer |
//! | [`config`] | Link tunables |
//! | [`error`] | Error types |

pub mod config;
pub mod error;
pub mod protocol;
pub mod raster;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::LinkConfig;
pub use error::NiimlinkError;
pub use protocol::{Packet, PacketFramer};
pub use raster::{EncodedImage, PrintDirection, RasterImage, encode};
pub use session::Session;
pub use transport::{DisconnectReason, Transport, TransportEvent, TransportKind};
