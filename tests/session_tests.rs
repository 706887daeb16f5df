//! # Session Tests
//!
//! End-to-end behaviour of a session over the in-memory transport: send
//! ordering, exclusivity, spacing and teardown.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use niimlink::protocol::Packet;
use niimlink::transport::{
    DisconnectReason, MockTransport, Transport, TransportEvent, TransportKind,
};
use niimlink::{LinkConfig, NiimlinkError, Session};
use pretty_assertions::assert_eq;

fn config(interval_ms: u64) -> LinkConfig {
    LinkConfig::DEFAULT.with_packet_interval(Duration::from_millis(interval_ms))
}

async fn open(config: LinkConfig) -> (Arc<MockTransport>, Session) {
    let mock = Arc::new(MockTransport::new(config));
    let session = Session::open(Box::new(mock.clone())).await.unwrap();
    (mock, session)
}

#[tokio::test]
async fn test_concurrent_sends_never_interleave() {
    let (mock, session) = open(config(1)).await;

    let packets: Vec<Packet> = (0u8..8)
        .map(|i| Packet::new(0x40 + i, vec![i; 16]).unwrap())
        .collect();
    let results = join_all(packets.iter().map(|p| session.send_packet(p, false))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let expected: Vec<u8> = packets.iter().flat_map(|p| p.to_bytes()).collect();
    assert_eq!(mock.wire(), expected);
    assert_eq!(mock.writes().len(), packets.len());
}

#[tokio::test(start_paused = true)]
async fn test_sends_spaced_by_interval() {
    let (mock, session) = open(config(50)).await;

    let start = tokio::time::Instant::now();
    let sends = [[1u8], [2u8], [3u8]];
    join_all(sends.iter().map(|s| session.send(s, false))).await;

    assert!(start.elapsed() >= Duration::from_millis(150));
    assert_eq!(mock.writes(), vec![vec![1], vec![2], vec![3]]);
}

#[tokio::test(start_paused = true)]
async fn test_urgent_send_skips_interval() {
    let (mock, session) = open(config(1000)).await;

    let start = tokio::time::Instant::now();
    session.send(&[0xFF], true).await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(mock.wire(), vec![0xFF]);
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_fails_queued_sends() {
    let (mock, session) = open(config(1000)).await;
    let session = &session;

    let sends = join_all([[1u8], [2u8], [3u8]].map(|s| async move { session.send(&s, false).await }));
    let drop_soon = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        mock.drop_link();
    };
    let (results, ()) = tokio::join!(sends, drop_soon);

    for result in results {
        assert!(matches!(result, Err(NiimlinkError::NotConnected)));
    }
    assert!(mock.wire().is_empty());
}

#[tokio::test]
async fn test_replies_arrive_in_order() {
    let (mock, mut session) = open(config(1)).await;

    let replies = [
        Packet::new(0x41, vec![0x01]).unwrap(),
        Packet::new(0x42, vec![0x02, 0x03]).unwrap(),
    ];
    let bytes: Vec<u8> = replies.iter().flat_map(|p| p.to_bytes()).collect();
    for chunk in bytes.chunks(3) {
        mock.inject(chunk).unwrap();
    }

    assert_eq!(session.next_packet().await.unwrap(), Some(replies[0].clone()));
    assert_eq!(session.next_packet().await.unwrap(), Some(replies[1].clone()));
}

#[tokio::test]
async fn test_disconnect_event_once_per_connection() {
    let (mock, mut session) = open(config(1)).await;

    assert!(matches!(session.next_event().await, Some(TransportEvent::Connected(_))));

    mock.drop_link();
    session.close().await.unwrap();
    mock.disconnect().await.unwrap();

    assert_eq!(
        session.next_event().await,
        Some(TransportEvent::Disconnected(DisconnectReason::Lost))
    );
    let pending = tokio::time::timeout(Duration::from_millis(20), session.next_event()).await;
    assert!(pending.is_err(), "no second Disconnected");
}

#[tokio::test]
async fn test_overflow_reaches_session_after_replies() {
    let (mock, mut session) = open(config(1).with_max_buffer(32)).await;

    let reply = Packet::new(0x41, vec![0x01]).unwrap();
    mock.inject(&reply.to_bytes()).unwrap();
    assert!(matches!(
        mock.inject(&[0x00; 33]),
        Err(NiimlinkError::FramerOverflow { .. })
    ));

    assert_eq!(session.next_packet().await.unwrap(), Some(reply));
    let err = session.next_packet().await.unwrap_err();
    assert!(matches!(err, NiimlinkError::FramerOverflow { len: 33, max: 32 }));

    let err = session.send(&[0x01], false).await.unwrap_err();
    assert!(matches!(err, NiimlinkError::NotConnected));
}

#[tokio::test]
async fn test_drop_while_connecting_fails_open() {
    let mock = Arc::new(MockTransport::new(config(1)));
    mock.drop_while_connecting(true);

    let err = Session::open(Box::new(mock.clone())).await.err().unwrap();
    assert!(matches!(err, NiimlinkError::Connection(_)));
    assert!(!mock.is_connected());
}

#[tokio::test]
async fn test_replace_swaps_transport() {
    let (first, mut session) = open(config(1)).await;
    let second = Arc::new(MockTransport::with_kind(TransportKind::Ble, config(1)));

    session.replace(Box::new(second.clone())).await.unwrap();
    session.send(&[0x01], false).await.unwrap();

    assert!(!first.is_connected());
    assert!(first.wire().is_empty());
    assert_eq!(second.wire(), vec![0x01]);
    assert_eq!(session.transport().kind(), TransportKind::Ble);
}
