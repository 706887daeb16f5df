//! # Mock Transport
//!
//! An in-memory transport with the same link state, framing and send
//! channel as the real variants. Writes are recorded instead of reaching a
//! device, and received bytes are injected by the test.
//!
//! Each write is copied to the wire one byte at a time with a yield in
//! between, so two writes that are not serialized show up interleaved.
//!
//! ```
//! use niimlink::config::LinkConfig;
//! use niimlink::protocol::Packet;
//! use niimlink::transport::{MockTransport, Transport, TransportEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), niimlink::NiimlinkError> {
//! let transport = MockTransport::new(LinkConfig::DEFAULT);
//! let mut events = transport.take_events().unwrap();
//! transport.connect().await?;
//!
//! transport.inject(&Packet::new(0x41, vec![0x01])?.to_bytes())?;
//!
//! assert!(matches!(events.recv().await, Some(TransportEvent::Connected(_))));
//! assert!(matches!(events.recv().await, Some(TransportEvent::Packet(_))));
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::channel::WireWriter;
use super::link::Link;
use super::{
    ConnectionInfo, ConnectionState, DisconnectReason, EventReceiver, Transport, TransportKind,
};
use crate::config::LinkConfig;
use crate::error::{NiimlinkError, Result};

pub struct MockTransport {
    link: Arc<Link>,
    kind: TransportKind,
    wire: Mutex<Vec<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    refuse_connect: AtomicBool,
    drop_while_connecting: AtomicBool,
}

impl MockTransport {
    pub fn new(config: LinkConfig) -> Self {
        Self::with_kind(TransportKind::Serial, config)
    }

    /// Mock reporting itself as `kind`.
    pub fn with_kind(kind: TransportKind, config: LinkConfig) -> Self {
        Self {
            link: Arc::new(Link::new(kind, config)),
            kind,
            wire: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            refuse_connect: AtomicBool::new(false),
            drop_while_connecting: AtomicBool::new(false),
        }
    }

    /// Make the next connects fail with a connection error.
    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Make the next connects see the device drop the link before the
    /// handshake completes.
    pub fn drop_while_connecting(&self, drop: bool) {
        self.drop_while_connecting.store(drop, Ordering::SeqCst);
    }

    /// Simulate bytes arriving from the device.
    pub fn inject(&self, bytes: &[u8]) -> Result<()> {
        if !self.link.is_connected() {
            return Err(NiimlinkError::NotConnected);
        }
        let result = self.link.ingest(bytes);
        if let Err(e) = &result {
            self.link.mark_disconnected(DisconnectReason::from_error(e));
        }
        result
    }

    /// Simulate the device dropping the link.
    pub fn drop_link(&self) {
        self.link.mark_disconnected(DisconnectReason::Lost);
    }

    /// Every byte written, in wire order.
    pub fn wire(&self) -> Vec<u8> {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every write call, in completion order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
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

        if self.refuse_connect.load(Ordering::SeqCst) {
            self.link.abort_connect();
            return Err(NiimlinkError::Connection("mock refused".into()));
        }

        if self.drop_while_connecting.load(Ordering::SeqCst) {
            self.link.mark_disconnected(DisconnectReason::Lost);
        }

        let info = ConnectionInfo {
            device_name: "Mock".to_string(),
            kind: self.kind,
        };
        self.link.mark_connected(&info)?;
        Ok(info)
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.mark_disconnected(DisconnectReason::Requested);
        Ok(())
    }

    async fn send(&self, data: &[u8], urgent: bool) -> Result<()> {
        self.link.channel().send(self, data, urgent).await
    }
}

#[async_trait]
impl WireWriter for MockTransport {
    fn is_writable(&self) -> bool {
        self.link.is_connected()
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        for byte in data {
            self.wire
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(*byte);
            tokio::task::yield_now().await;
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.to_vec());
        Ok(())
    }

    async fn teardown(&self) {
        let _ = self.disconnect().await;
    }
}
