//! Delivery and redelivery tests
//!
//! Unacknowledged QoS 1/2 messages are resent with the duplicate marker once
//! the retry interval has passed; QoS 0 messages never are.

mod test_helpers;

use mqtt_session::config::SessionOptions;
use mqtt_session::session::{ConnectionResponse, MessageState, RetryPolicy};
use mqtt_session::testing::EngineCall;
use mqtt_session::transport::TransportEvent;
use std::time::{Duration, Instant};
use test_helpers::{connected_session, reading};

#[tokio::test]
async fn test_unacknowledged_qos1_is_resent_after_interval() {
    let (mut session, handle, _delegate) = connected_session(SessionOptions::default()).await;
    let packet_id = session.publish(reading(1)).await.unwrap();
    let sent_at = Instant::now();

    assert_eq!(session.resend_expired(sent_at + Duration::from_secs(59)).await, 0);
    assert_eq!(session.resend_expired(sent_at + Duration::from_secs(60)).await, 1);

    let publishes = handle.publishes();
    assert_eq!(publishes.len(), 2);
    assert!(!publishes[0].duplicate);
    assert!(publishes[1].duplicate);
    assert_eq!(publishes[1].packet_id, packet_id);
    assert_eq!(publishes[1].payload, publishes[0].payload);

    // The resend restarts the interval
    assert_eq!(session.resend_expired(sent_at + Duration::from_secs(90)).await, 0);
    assert_eq!(session.resend_expired(sent_at + Duration::from_secs(121)).await, 1);
}

#[tokio::test]
async fn test_qos0_is_never_resent() {
    let (mut session, handle, delegate) = connected_session(SessionOptions::default()).await;
    let packet_id = session.publish(reading(0)).await.unwrap();

    assert_eq!(
        session
            .resend_expired(Instant::now() + Duration::from_secs(600))
            .await,
        0
    );
    assert_eq!(handle.publishes().len(), 1);

    // Completion of the write settles the entry
    session.handle_event(TransportEvent::PublishAck(packet_id)).await;
    assert!(session.in_flight().is_empty());
    assert_eq!(delegate.published().len(), 1);
}

#[tokio::test]
async fn test_retry_timer_drives_resend_while_polling() {
    let (mut session, handle, _delegate) = connected_session(SessionOptions::default()).await;
    session
        .set_message_retry(Duration::from_millis(50))
        .unwrap();
    session.publish(reading(2)).await.unwrap();

    let resent = tokio::time::timeout(Duration::from_secs(5), async {
        while handle.publishes().len() < 2 {
            session.poll().await;
        }
    })
    .await;

    assert!(resent.is_ok(), "retry timer never fired");
    assert!(handle.publishes()[1].duplicate);
    assert!(session.metrics_snapshot().messages_retried >= 1);
}

#[tokio::test]
async fn test_ack_for_unknown_packet_changes_nothing() {
    let (mut session, _handle, delegate) = connected_session(SessionOptions::default()).await;
    let packet_id = session.publish(reading(1)).await.unwrap();

    session
        .handle_event(TransportEvent::PublishAck(packet_id.wrapping_add(100)))
        .await;

    assert_eq!(session.in_flight().len(), 1);
    assert!(delegate.events().is_empty());
}

#[tokio::test]
async fn test_bounded_retry_reports_failure() {
    let options = SessionOptions {
        retry: RetryPolicy {
            interval: Duration::from_secs(5),
            max_retry_attempts: Some(2),
        },
        ..Default::default()
    };
    let (mut session, handle, delegate) = connected_session(options).await;
    let packet_id = session.publish(reading(1)).await.unwrap();
    let start = Instant::now();

    assert_eq!(session.resend_expired(start + Duration::from_secs(6)).await, 1);
    assert_eq!(session.resend_expired(start + Duration::from_secs(12)).await, 1);
    assert_eq!(session.resend_expired(start + Duration::from_secs(18)).await, 0);

    assert!(!session.in_flight().contains(packet_id));
    assert_eq!(handle.publishes().len(), 3);
    let failed = delegate.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].packet_id(), Some(packet_id));
    assert_eq!(failed[0].state(), MessageState::Failed);
}

#[tokio::test]
async fn test_no_resend_while_disconnected() {
    let options = SessionOptions {
        clean_session: false,
        ..Default::default()
    };
    let (mut session, handle, _delegate) = connected_session(options).await;
    session.publish(reading(1)).await.unwrap();
    session
        .handle_event(TransportEvent::Disconnected { graceful: false })
        .await;

    assert_eq!(
        session
            .resend_expired(Instant::now() + Duration::from_secs(600))
            .await,
        0
    );
    assert_eq!(handle.publishes().len(), 1);
}

#[tokio::test]
async fn test_reconnect_resends_preserved_messages_as_duplicates() {
    let options = SessionOptions {
        clean_session: false,
        ..Default::default()
    };
    let (mut session, handle, _delegate) = connected_session(options).await;
    let first = session.publish(reading(1)).await.unwrap();
    let second = session.publish(reading(2)).await.unwrap();
    session
        .handle_event(TransportEvent::Disconnected { graceful: false })
        .await;
    handle.clear_calls();

    session.reconnect().await.unwrap();
    session
        .handle_event(TransportEvent::ConnectionResult(
            ConnectionResponse::Successful,
        ))
        .await;

    let calls = handle.calls();
    let EngineCall::Open(request) = &calls[0] else {
        panic!("expected open first, got {calls:?}");
    };
    assert!(!request.clean_session);

    let publishes = handle.publishes();
    let ids: Vec<u16> = publishes.iter().map(|p| p.packet_id).collect();
    assert_eq!(ids, vec![first, second]);
    assert!(publishes.iter().all(|p| p.duplicate));
}

#[tokio::test]
async fn test_clean_reconnect_discards_preserved_messages() {
    let options = SessionOptions {
        clean_session: false,
        ..Default::default()
    };
    let (mut session, handle, _delegate) = connected_session(options).await;
    session.publish(reading(1)).await.unwrap();
    session
        .handle_event(TransportEvent::Disconnected { graceful: false })
        .await;
    handle.clear_calls();

    session.set_clean_session(true);
    session.connect().await.unwrap();
    session
        .handle_event(TransportEvent::ConnectionResult(
            ConnectionResponse::Successful,
        ))
        .await;

    assert!(session.in_flight().is_empty());
    assert!(handle.publishes().is_empty());
}
