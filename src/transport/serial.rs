//! # Serial Transport
//!
//! Talks to a printer attached over USB serial (CDC-ACM) or any other tty.
//!
//! ## Port Settings
//!
//! | Setting | Value |
//! |---------|-------|
//! | Baud rate | 115200 |
//! | Data bits | 8 |
//! | Parity | none |
//! | Flow control | none |
//!
//! There is no discovery step: the caller supplies the port path and the
//! open either succeeds or fails. Reads deliver an unbounded byte stream, so
//! every chunk is accumulated by the framer before packets are emitted.
//!
//! ## Example
//!
//! ```no_run
//! use niimlink::config::LinkConfig;
//! use niimlink::transport::{SerialTransport, Transport};
//!
//! # async fn example() -> Result<(), niimlink::NiimlinkError> {
//! let transport = SerialTransport::new("/dev/ttyACM0", LinkConfig::DEFAULT);
//! let info = transport.connect().await?;
//! println!("connected to {}", info.device_name);
//! transport.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;

use super::channel::WireWriter;
use super::link::Link;
use super::stream::StreamIo;
use super::{
    ConnectionInfo, ConnectionState, DisconnectReason, EventReceiver, Transport, TransportKind,
};
use crate::config::{LinkConfig, SERIAL_BAUD_RATE};
use crate::error::{NiimlinkError, Result};

pub struct SerialTransport {
    path: String,
    link: Arc<Link>,
    io: StreamIo,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, config: LinkConfig) -> Self {
        Self {
            path: path.into(),
            link: Arc::new(Link::new(TransportKind::Serial, config)),
            io: StreamIo::default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn take_events(&self) -> Option<EventReceiver> {
        self.link.take_events()
    }

    fn decode_errors(&self) -> u64 {
        self.link.decode_errors()
    }

    async fn connect(&self) -> Result<ConnectionInfo> {
        self.disconnect().await?;
        self.link.begin_connect();

        let port = match tokio_serial::new(&self.path, SERIAL_BAUD_RATE).open_native_async() {
            Ok(port) => port,
            Err(e) => {
                self.link.abort_connect();
                return Err(NiimlinkError::Connection(format!(
                    "Failed to open {}: {}",
                    self.path, e
                )));
            }
        };

        let (reader, writer) = tokio::io::split(port);
        self.io.attach(self.link.clone(), reader, writer).await;

        let info = ConnectionInfo {
            device_name: format!("Serial ({})", self.path),
            kind: TransportKind::Serial,
        };
        if let Err(e) = self.link.mark_connected(&info) {
            self.io.close().await;
            return Err(e);
        }
        Ok(info)
    }

    async fn disconnect(&self) -> Result<()> {
        self.io.close().await;
        self.link.mark_disconnected(DisconnectReason::Requested);
        Ok(())
    }

    async fn send(&self, data: &[u8], urgent: bool) -> Result<()> {
        self.link.channel().send(self, data, urgent).await
    }
}

#[async_trait]
impl WireWriter for SerialTransport {
    fn is_writable(&self) -> bool {
        self.link.is_connected()
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        self.io.write(data).await
    }

    async fn teardown(&self) {
        // disconnect never fails
        let _ = self.disconnect().await;
    }
}
