//! Test helpers and utilities for integration tests

use mqtt_session::config::{BrokerConfig, SessionOptions};
use mqtt_session::session::{ConnectionResponse, Message, SessionManager};
use mqtt_session::testing::{MockEngine, MockEngineHandle, RecordingDelegate};
use mqtt_session::transport::TransportEvent;

pub type TestSession = SessionManager<MockEngine, RecordingDelegate>;

/// Create a disconnected session over a mock engine
#[allow(dead_code)]
pub fn test_session(options: SessionOptions) -> (TestSession, MockEngineHandle, RecordingDelegate) {
    let (engine, handle) = MockEngine::new();
    let delegate = RecordingDelegate::new();
    let broker = BrokerConfig::new("broker.local", 1883, None).unwrap();
    let session =
        SessionManager::with_options("sensor-1", broker, options, engine, delegate.clone())
            .unwrap();
    (session, handle, delegate)
}

/// Create a session that completed a successful connect handshake
#[allow(dead_code)]
pub async fn connected_session(
    options: SessionOptions,
) -> (TestSession, MockEngineHandle, RecordingDelegate) {
    let (mut session, handle, delegate) = test_session(options);
    session.connect().await.unwrap();
    handle.push_event(TransportEvent::ConnectionResult(
        ConnectionResponse::Successful,
    ));
    assert!(session.poll().await);
    assert!(session.is_connected());
    delegate.clear();
    (session, handle, delegate)
}

#[allow(dead_code)]
pub fn reading(qos: u8) -> Message {
    Message::new("sensors/temp", vec![0x17], qos, false).unwrap()
}
