//! Transport engine boundary
//!
//! The session manager never touches sockets or wire encoding. It drives an
//! engine through [`TransportEngine`] and consumes the [`TransportEvent`]s the
//! engine reports back.

use crate::session::{ConnectionResponse, QoS, Will};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Username and optional password presented at connect time
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything the engine needs to open a connection
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub identifier: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
    pub will: Option<Will>,
}

/// Application message handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingPublish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub packet_id: u16,
    /// Set when this is a redelivery of a message already sent once
    pub duplicate: bool,
}

/// Application message delivered by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Present for QoS 1 and 2; the session acknowledges it
    pub packet_id: Option<u16>,
}

/// Events reported by the engine, in the order it observed them
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionResult(ConnectionResponse),
    Disconnected { graceful: bool },
    /// Broker acknowledged a publish (for QoS 0: the engine wrote it)
    PublishAck(u16),
    SubscribeAck(u16),
    UnsubscribeAck(u16),
    Message(IncomingMessage),
}

/// Engine failures, mapped into the session's error taxonomy
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Connection refused: {0:?}")]
    Refused(ConnectionResponse),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Transport engine is not open")]
    NotOpen,
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Wire-protocol engine driven by the session manager
///
/// Calls return once the request is handed to the engine; outcomes arrive
/// later through [`TransportEngine::next_event`].
#[async_trait::async_trait]
pub trait TransportEngine: Send {
    /// Open a connection; the result arrives as a `ConnectionResult` event
    async fn open(&mut self, request: OpenRequest) -> Result<(), TransportError>;

    /// Close gracefully; completion arrives as `Disconnected { graceful: true }`
    async fn close(&mut self) -> Result<(), TransportError>;

    async fn publish(&mut self, publish: OutgoingPublish) -> Result<(), TransportError>;

    async fn subscribe(
        &mut self,
        topic_filter: &str,
        qos: QoS,
        packet_id: u16,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, topic_filter: &str, packet_id: u16)
        -> Result<(), TransportError>;

    /// Acknowledge an incoming QoS 1/2 message at the protocol level
    async fn acknowledge(&mut self, packet_id: u16) -> Result<(), TransportError>;

    /// Next event, or `None` once the engine has no more events to report
    /// until it is opened again
    async fn next_event(&mut self) -> Option<TransportEvent>;
}
