//! # Link Configuration
//!
//! Tunables shared by every transport variant.
//!
//! | Field | Default | Meaning |
//! |-------|---------|---------|
//! | `packet_interval` | 10 ms | minimum spacing between non-urgent sends |
//! | `discovery_timeout` | 5 s | BLE scan-by-address/name, RFCOMM channel lookup |
//! | `adapter_timeout` | 5 s | wait for the BLE adapter to report powered-on |
//! | `max_buffer` | 4096 bytes | receive bytes held without a packet marker |
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use niimlink::config::LinkConfig;
//!
//! let config = LinkConfig::DEFAULT.with_packet_interval(Duration::from_millis(50));
//! assert_eq!(config.packet_interval, Duration::from_millis(50));
//! assert_eq!(config.max_buffer, 4096);
//! ```

use std::time::Duration;

/// Serial baud rate used by the printers.
pub const SERIAL_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Minimum delay before every non-urgent write
    pub packet_interval: Duration,

    /// Upper bound for device discovery
    pub discovery_timeout: Duration,

    /// Upper bound for the BLE adapter to power on
    pub adapter_timeout: Duration,

    /// Maximum receive buffer size without a packet marker
    pub max_buffer: usize,
}

impl LinkConfig {
    pub const DEFAULT: Self = Self {
        packet_interval: Duration::from_millis(10),
        discovery_timeout: Duration::from_secs(5),
        adapter_timeout: Duration::from_secs(5),
        max_buffer: 4096,
    };

    pub fn with_packet_interval(mut self, interval: Duration) -> Self {
        self.packet_interval = interval;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn with_max_buffer(mut self, max: usize) -> Self {
        self.max_buffer = max;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
