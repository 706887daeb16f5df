//! Per-transport shared state.
//!
//! Every variant owns one [`Link`]: connection status, the receive framer,
//! the send channel and the event sender. Reader tasks hold an `Arc` to it
//! so a lower-layer drop can mark the link down without touching the
//! transport itself.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::channel::ExclusiveChannel;
use super::{
    ConnectionInfo, ConnectionState, DisconnectReason, EventReceiver, TransportEvent, TransportKind,
};
use crate::config::LinkConfig;
use crate::error::{NiimlinkError, Result};
use crate::protocol::PacketFramer;

#[derive(Debug)]
pub(crate) struct Link {
    kind: TransportKind,
    config: LinkConfig,
    state: Mutex<ConnectionState>,
    framer: Mutex<PacketFramer>,
    channel: ExclusiveChannel,
    events: mpsc::UnboundedSender<TransportEvent>,
    receiver: Mutex<Option<EventReceiver>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Link {
    pub fn new(kind: TransportKind, config: LinkConfig) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        Self {
            kind,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            framer: Mutex::new(PacketFramer::new(config.max_buffer)),
            channel: ExclusiveChannel::new(config.packet_interval),
            events,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn channel(&self) -> &ExclusiveChannel {
        &self.channel
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn take_events(&self) -> Option<EventReceiver> {
        lock(&self.receiver).take()
    }

    pub fn decode_errors(&self) -> u64 {
        lock(&self.framer).decode_errors()
    }

    /// Disconnected -> Connecting. Clears bytes left over from a previous link.
    pub fn begin_connect(&self) {
        lock(&self.framer).clear();
        *lock(&self.state) = ConnectionState::Connecting;
        debug!(kind = %self.kind, "connecting");
    }

    /// Connecting -> Disconnected without a disconnect event.
    pub fn abort_connect(&self) {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Disconnected;
            debug!(kind = %self.kind, "connect aborted");
        }
    }

    /// Connecting -> Connected.
    ///
    /// ## Errors
    ///
    /// [`NiimlinkError::Connection`] when the link dropped while connecting;
    /// the caller must release whatever it opened.
    pub fn mark_connected(&self, info: &ConnectionInfo) -> Result<()> {
        let mut state = lock(&self.state);
        let current = *state;
        if current != ConnectionState::Connecting {
            debug!(kind = %self.kind, state = ?current, "link dropped while connecting");
            return Err(NiimlinkError::Connection(format!(
                "{} dropped while connecting",
                info.device_name
            )));
        }
        *state = ConnectionState::Connected;
        info!(kind = %self.kind, device = %info.device_name, "connected");
        self.emit(TransportEvent::Connected(info.clone()));
        Ok(())
    }

    /// Move to Disconnected. Emits exactly one `Disconnected` event per
    /// connected period; returns whether this call was the one that did.
    pub fn mark_disconnected(&self, reason: DisconnectReason) -> bool {
        let emitted = {
            let mut state = lock(&self.state);
            let previous = std::mem::replace(&mut *state, ConnectionState::Disconnected);
            match previous {
                ConnectionState::Connected => {
                    info!(kind = %self.kind, ?reason, "disconnected");
                    self.emit(TransportEvent::Disconnected(reason));
                    true
                }
                ConnectionState::Connecting => {
                    debug!(kind = %self.kind, ?reason, "connect interrupted");
                    false
                }
                ConnectionState::Disconnected => false,
            }
        };

        self.channel.release_waiters();
        emitted
    }

    /// Feed received bytes through the framer and publish complete packets.
    ///
    /// ## Errors
    ///
    /// Propagates [`NiimlinkError::FramerOverflow`]; the caller must tear
    /// the link down with [`DisconnectReason::from_error`].
    pub fn ingest(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        trace!(data = %hex::encode(bytes), "<< received");

        let packets = lock(&self.framer).push(bytes)?;
        for packet in packets {
            trace!(command = packet.command(), len = packet.payload().len(), "packet");
            self.emit(TransportEvent::Packet(packet));
        }
        Ok(())
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver is gone only when nobody listens any more.
        if self.events.send(event).is_err() {
            warn!(kind = %self.kind, "event dropped, no receiver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Packet;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            device_name: "test".into(),
            kind: TransportKind::Serial,
        }
    }

    #[test]
    fn test_state_transitions() {
        let link = Link::new(TransportKind::Serial, LinkConfig::DEFAULT);
        assert_eq!(link.state(), ConnectionState::Disconnected);

        link.begin_connect();
        assert_eq!(link.state(), ConnectionState::Connecting);

        link.abort_connect();
        assert_eq!(link.state(), ConnectionState::Disconnected);

        link.begin_connect();
        link.mark_connected(&info()).unwrap();
        assert!(link.is_connected());
    }

    #[test]
    fn test_disconnect_event_once() {
        let link = Link::new(TransportKind::Serial, LinkConfig::DEFAULT);
        let mut events = link.take_events().unwrap();

        link.begin_connect();
        link.mark_connected(&info()).unwrap();
        assert!(link.mark_disconnected(DisconnectReason::Lost));
        assert!(!link.mark_disconnected(DisconnectReason::Requested));

        assert!(matches!(events.try_recv(), Ok(TransportEvent::Connected(_))));
        assert!(matches!(
            events.try_recv(),
            Ok(TransportEvent::Disconnected(DisconnectReason::Lost))
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_failed_connect_emits_nothing() {
        let link = Link::new(TransportKind::Ble, LinkConfig::DEFAULT);
        let mut events = link.take_events().unwrap();

        link.begin_connect();
        assert!(!link.mark_disconnected(DisconnectReason::Lost));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_drop_while_connecting_blocks_connected() {
        let link = Link::new(TransportKind::Serial, LinkConfig::DEFAULT);
        let mut events = link.take_events().unwrap();

        link.begin_connect();
        link.mark_disconnected(DisconnectReason::Lost);

        let err = link.mark_connected(&info()).unwrap_err();
        assert!(matches!(err, NiimlinkError::Connection(_)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_connected_requires_connecting() {
        let link = Link::new(TransportKind::Serial, LinkConfig::DEFAULT);
        assert!(link.mark_connected(&info()).is_err());
        assert!(!link.is_connected());
    }

    #[test]
    fn test_events_taken_once() {
        let link = Link::new(TransportKind::Ble, LinkConfig::DEFAULT);
        assert!(link.take_events().is_some());
        assert!(link.take_events().is_none());
    }

    #[test]
    fn test_ingest_publishes_packets() {
        let link = Link::new(TransportKind::Serial, LinkConfig::DEFAULT);
        let mut events = link.take_events().unwrap();
        let bytes = Packet::new(0x01, vec![0x02]).unwrap().to_bytes();

        link.ingest(&bytes[..4]).unwrap();
        assert!(events.try_recv().is_err());

        link.ingest(&bytes[4..]).unwrap();
        match events.try_recv() {
            Ok(TransportEvent::Packet(packet)) => assert_eq!(packet.payload(), &[0x02]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_reconnect_clears_buffer() {
        let link = Link::new(TransportKind::Serial, LinkConfig::DEFAULT);
        let mut events = link.take_events().unwrap();
        let bytes = Packet::new(0x01, vec![]).unwrap().to_bytes();

        link.ingest(&bytes[..3]).unwrap();
        link.begin_connect();
        link.ingest(&bytes[3..]).unwrap();
        assert!(events.try_recv().is_err());
    }
}
