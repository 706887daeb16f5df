//! # Error Types
//!
//! This module defines error types used throughout the niimlink library.
//!
//! ## Taxonomy
//!
//! | Variant | Raised by | Surfaced? |
//! |---------|-----------|-----------|
//! | `Discovery` | BLE scan, RFCOMM channel lookup | yes |
//! | `Connection` | open / handshake | yes, transport left disconnected |
//! | `NotConnected` | send without a live link | yes, triggers teardown |
//! | `FrameDecode` | framer, malformed span | no, logged and skipped |
//! | `FramerOverflow` | framer, no marker in a full buffer | yes, fatal for the link |
//! | `EncodeConstraint` | raster encoder | yes, no partial result |

use thiserror::Error;

/// Main error type for niimlink operations
#[derive(Debug, Error)]
pub enum NiimlinkError {
    /// Device or channel not found within the discovery timeout
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Lower-layer open or handshake error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Operation needs an active link
    #[error("Not connected")]
    NotConnected,

    /// Malformed bytes inside the receive stream
    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    /// Receive buffer grew past its limit without a packet marker
    #[error("Receive buffer overflow: {len} bytes without a packet marker (max {max})")]
    FramerOverflow { len: usize, max: usize },

    /// Image cannot be encoded for the device
    #[error("Encode constraint violated: {0}")]
    EncodeConstraint(String),

    /// Image loading or preview error
    #[error("Image error: {0}")]
    Image(String),

    /// Transport-level errors (write, close)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NiimlinkError {
    /// Whether this error means the link can no longer be used.
    pub fn is_fatal_for_link(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::FramerOverflow { .. } | Self::Transport(_) | Self::Io(_)
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, NiimlinkError>;
