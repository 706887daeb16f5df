//! # Session
//!
//! Owns exactly one transport at a time and hands decoded packets to the
//! protocol layer above it.
//!
//! ```text
//! protocol layer ── send / send_packet ──► Session ──► Transport ──► device
//!                ◄── next_event / next_packet ──┘ ◄── events ◄──┘
//! ```
//!
//! A session is created connected. [`Session::close`] is idempotent, and
//! [`Session::replace`] closes the current transport before adopting the
//! next one, so two transports are never live through the same session.
//!
//! ## Example
//!
//! ```
//! use niimlink::config::LinkConfig;
//! use niimlink::protocol::Packet;
//! use niimlink::session::Session;
//! use niimlink::transport::MockTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), niimlink::NiimlinkError> {
//! let mut session = Session::open(Box::new(MockTransport::new(LinkConfig::DEFAULT))).await?;
//! session.send_packet(&Packet::new(0x40, vec![0x01])?, false).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info};

use crate::error::{NiimlinkError, Result};
use crate::protocol::Packet;
use crate::transport::{ConnectionInfo, EventReceiver, Transport, TransportEvent};

pub struct Session {
    transport: Box<dyn Transport>,
    events: EventReceiver,
    info: ConnectionInfo,
    closed: bool,
}

impl Session {
    /// Take the transport's event receiver and connect.
    ///
    /// ## Errors
    ///
    /// [`NiimlinkError::Connection`] if the receiver was already taken, or
    /// whatever the transport's `connect` returns.
    pub async fn open(transport: Box<dyn Transport>) -> Result<Self> {
        let events = transport.take_events().ok_or_else(|| {
            NiimlinkError::Connection("transport events already claimed".to_string())
        })?;

        let info = transport.connect().await?;
        info!(device = %info.device_name, kind = %info.kind, "session opened");

        Ok(Self {
            transport,
            events,
            info,
            closed: false,
        })
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && self.transport.is_connected()
    }

    /// Send raw protocol bytes.
    pub async fn send(&self, data: &[u8], urgent: bool) -> Result<()> {
        if self.closed {
            return Err(NiimlinkError::NotConnected);
        }
        self.transport.send(data, urgent).await
    }

    pub async fn send_packet(&self, packet: &Packet, urgent: bool) -> Result<()> {
        self.send(&packet.to_bytes(), urgent).await
    }

    /// Next transport event; `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Next decoded packet, skipping connect notices.
    ///
    /// Returns `Ok(None)` when the link goes down normally.
    ///
    /// ## Errors
    ///
    /// The fatal error behind the disconnect, such as
    /// [`NiimlinkError::FramerOverflow`].
    pub async fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let Some(event) = self.events.recv().await else {
                return Ok(None);
            };
            match event {
                TransportEvent::Packet(packet) => return Ok(Some(packet)),
                TransportEvent::Connected(_) => continue,
                TransportEvent::Disconnected(reason) => {
                    return match reason.error() {
                        Some(e) => Err(e),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    /// Close the current transport and open `transport` in its place.
    ///
    /// The old transport is disconnected even if the new one fails to
    /// connect; in that case the session stays closed.
    pub async fn replace(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.close().await?;
        let next = Session::open(transport).await?;
        debug!(device = %next.info.device_name, "session transport replaced");
        *self = next;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.disconnect().await?;
        info!(device = %self.info.device_name, "session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::transport::{MockTransport, TransportKind};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> LinkConfig {
        LinkConfig::DEFAULT.with_packet_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_open_connects() {
        let mock = Arc::new(MockTransport::new(fast()));
        let session = Session::open(Box::new(mock.clone())).await.unwrap();

        assert!(session.is_connected());
        assert_eq!(session.info().device_name, "Mock");
        assert!(mock.is_connected());
    }

    #[tokio::test]
    async fn test_open_needs_event_receiver() {
        let mock = MockTransport::new(fast());
        let _taken = mock.take_events();
        let err = Session::open(Box::new(mock)).await.err().unwrap();
        assert!(matches!(err, NiimlinkError::Connection(_)));
    }

    #[tokio::test]
    async fn test_send_packet_reaches_wire() {
        let mock = Arc::new(MockTransport::new(fast()));
        let session = Session::open(Box::new(mock.clone())).await.unwrap();

        let packet = Packet::new(0x40, vec![0x01]).unwrap();
        session.send_packet(&packet, false).await.unwrap();
        assert_eq!(mock.wire(), packet.to_bytes());
    }

    #[tokio::test]
    async fn test_next_packet_skips_connected() {
        let mock = Arc::new(MockTransport::new(fast()));
        let mut session = Session::open(Box::new(mock.clone())).await.unwrap();

        let packet = Packet::new(0x41, vec![0x07, 0x08]).unwrap();
        mock.inject(&packet.to_bytes()).unwrap();
        assert_eq!(session.next_packet().await.unwrap(), Some(packet));

        mock.drop_link();
        assert_eq!(session.next_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overflow_surfaces_as_error() {
        let mock = Arc::new(MockTransport::new(fast().with_max_buffer(16)));
        let mut session = Session::open(Box::new(mock.clone())).await.unwrap();

        assert!(mock.inject(&[0x00; 17]).is_err());

        let err = session.next_packet().await.unwrap_err();
        assert!(matches!(err, NiimlinkError::FramerOverflow { len: 17, max: 16 }));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let mock = Arc::new(MockTransport::new(fast()));
        let mut session = Session::open(Box::new(mock.clone())).await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(
            session.send(&[1], false).await,
            Err(NiimlinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_replace_tears_down_previous() {
        let first = Arc::new(MockTransport::new(fast()));
        let second = Arc::new(MockTransport::with_kind(TransportKind::Ble, fast()));
        let mut session = Session::open(Box::new(first.clone())).await.unwrap();

        session.replace(Box::new(second.clone())).await.unwrap();

        assert!(!first.is_connected());
        assert!(second.is_connected());
        assert_eq!(session.info().kind, TransportKind::Ble);
    }

    #[tokio::test]
    async fn test_replace_failure_leaves_old_closed() {
        let first = Arc::new(MockTransport::new(fast()));
        let second = MockTransport::new(fast());
        second.refuse_connect(true);
        let mut session = Session::open(Box::new(first.clone())).await.unwrap();

        assert!(session.replace(Box::new(second)).await.is_err());
        assert!(!first.is_connected());
        assert!(!session.is_connected());
    }
}
