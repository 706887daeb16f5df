//! # Printer Transport Layer
//!
//! This module provides the communication backends that carry protocol
//! bytes to and from the printer.
//!
//! ## Available Transports
//!
//! | Kind | Type | Discovery | Receive path |
//! |------|------|-----------|--------------|
//! | `ble` | [`BleTransport`] | scan by address or name, GATT channel lookup | notifications |
//! | `serial` | [`SerialTransport`] | none, open the path | byte stream |
//! | `bluetooth` | [`ClassicBluetoothTransport`] | RFCOMM channel from MAC | byte stream |
//! | (tests) | [`MockTransport`] | none | injected |
//!
//! ## Lifecycle
//!
//! ```text
//!              connect()                 handshake ok
//! Disconnected ─────────► Connecting ───────────────► Connected
//!      ▲                      │                           │
//!      │   timeout / failure  │     disconnect() or       │
//!      └──────────────────────┴──────── link drop ◄───────┘
//! ```
//!
//! `disconnect()` is idempotent. Exactly one [`TransportEvent::Disconnected`]
//! is emitted per connected period, whether the link was closed explicitly,
//! dropped by the device, or both. It carries a [`DisconnectReason`]; a
//! receive buffer overflow is reported there as a fatal error.
//!
//! A link that drops while still `Connecting` makes `connect()` fail with
//! [`NiimlinkError::Connection`]; it never reports `Connected`.
//!
//! ## Events
//!
//! Received packets, connects and disconnects are pushed to a channel whose
//! receiver is taken once with [`Transport::take_events`]. Packets arrive in
//! the order their bytes were received.

pub mod ble;
pub mod bluetooth;
pub mod channel;
mod link;
pub mod mock;
pub mod serial;
mod stream;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

pub use ble::BleTransport;
pub use bluetooth::ClassicBluetoothTransport;
pub use channel::ExclusiveChannel;
pub use mock::MockTransport;
pub use serial::SerialTransport;

use crate::config::LinkConfig;
use crate::error::{NiimlinkError, Result};
use crate::protocol::Packet;

/// Physical link used to reach the printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Bluetooth Low Energy (GATT)
    Ble,
    /// Serial port / USB CDC
    Serial,
    /// Classic Bluetooth RFCOMM
    Bluetooth,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ble => "ble",
            Self::Serial => "serial",
            Self::Bluetooth => "bluetooth",
        })
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ble" => Ok(Self::Ble),
            "serial" => Ok(Self::Serial),
            "bluetooth" | "rfcomm" => Ok(Self::Bluetooth),
            other => Err(format!(
                "unknown transport '{}' (expected ble, serial or bluetooth)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of a successful connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub device_name: String,
    pub kind: TransportKind,
}

/// Why a connected period ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called, directly or after a failed send
    Requested,
    /// The device or the lower layer closed the link
    Lost,
    /// Receive buffer grew past its limit without a packet marker
    Overflow { len: usize, max: usize },
}

impl DisconnectReason {
    /// Reason for a receive path that stopped on `err`.
    pub fn from_error(err: &NiimlinkError) -> Self {
        match err {
            NiimlinkError::FramerOverflow { len, max } => Self::Overflow {
                len: *len,
                max: *max,
            },
            _ => Self::Lost,
        }
    }

    /// The fatal error behind this disconnect, if there is one.
    pub fn error(&self) -> Option<NiimlinkError> {
        match *self {
            Self::Overflow { len, max } => Some(NiimlinkError::FramerOverflow { len, max }),
            Self::Requested | Self::Lost => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(ConnectionInfo),
    Packet(Packet),
    Disconnected(DisconnectReason),
}

pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// # Transport Capability
///
/// The operations every link variant supports. Variants are chosen at
/// construction (see [`open`]) and used through `dyn Transport`.
///
/// ## Guarantees
///
/// - Non-urgent sends reach the wire in call order, spaced by the configured
///   interval, one at a time. Urgent sends may overtake queued ones.
/// - A send on a link that is not connected fails with
///   [`crate::NiimlinkError::NotConnected`] and tears the link down.
/// - `connect` on a connected transport disconnects first.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Event receiver; `None` after the first call.
    fn take_events(&self) -> Option<EventReceiver>;

    /// Malformed spans the framer dropped so far
    fn decode_errors(&self) -> u64;

    async fn connect(&self) -> Result<ConnectionInfo>;

    async fn disconnect(&self) -> Result<()>;

    async fn send(&self, data: &[u8], urgent: bool) -> Result<()>;
}

/// Shared handle to a transport, used where the owner and an observer both
/// need it (a session and a test, for instance).
#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn state(&self) -> ConnectionState {
        (**self).state()
    }

    fn take_events(&self) -> Option<EventReceiver> {
        (**self).take_events()
    }

    fn decode_errors(&self) -> u64 {
        (**self).decode_errors()
    }

    async fn connect(&self) -> Result<ConnectionInfo> {
        (**self).connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn send(&self, data: &[u8], urgent: bool) -> Result<()> {
        (**self).send(data, urgent).await
    }
}

/// Build the transport for `kind`.
///
/// `address` is a BLE address or name, a serial port path, or a classic
/// Bluetooth MAC address.
pub fn open(kind: TransportKind, address: &str, config: LinkConfig) -> Box<dyn Transport> {
    match kind {
        TransportKind::Ble => Box::new(BleTransport::new(address, config)),
        TransportKind::Serial => Box::new(SerialTransport::new(address, config)),
        TransportKind::Bluetooth => Box::new(ClassicBluetoothTransport::new(address, config)),
    }
}
