//! Message values and topic validation
//!
//! A [`Message`] is one application-level unit of work: a publish, a
//! subscription request or an unsubscription request. The session manager is
//! the only component that moves a message through its [`MessageState`]s.

use crate::error::{SessionError, SessionResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest payload the MQTT remaining-length field can describe
pub const MAX_PAYLOAD_SIZE: usize = 268_435_455;

/// MQTT quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// Whether delivery at this level requires an acknowledgement
    pub fn requires_ack(self) -> bool {
        self != QoS::AtMostOnce
    }
}

impl TryFrom<u8> for QoS {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(SessionError::invalid_input(format!(
                "QoS must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Created, not yet handed to the transport engine
    Pending,
    /// Handed to the engine, no acknowledgement expected (QoS 0 publish)
    Sent,
    /// Handed to the engine, waiting for the broker's acknowledgement
    AwaitingAck,
    Acknowledged,
    Failed,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Acknowledged | MessageState::Failed)
    }
}

/// One application-level unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    packet_id: Option<u16>,
    state: MessageState,
}

impl Message {
    /// Create a new pending message.
    ///
    /// The topic may be a topic filter (`+` and `#` are accepted here and
    /// checked by the transport engine). Payload size is checked at publish
    /// time, not here.
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: u8,
        retain: bool,
    ) -> SessionResult<Self> {
        let topic = topic.into();
        validate_topic(&topic)?;
        let qos = QoS::try_from(qos)?;

        Ok(Self {
            topic,
            payload: payload.into(),
            qos,
            retain,
            packet_id: None,
            state: MessageState::Pending,
        })
    }

    /// Convenience constructor for subscribe and unsubscribe requests
    pub fn filter(topic_filter: impl Into<String>, qos: u8) -> SessionResult<Self> {
        Self::new(topic_filter, Bytes::new(), qos, false)
    }

    /// Build a message the engine received from the broker.
    /// Broker-supplied topics are taken as-is.
    pub(crate) fn incoming(
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        packet_id: Option<u16>,
    ) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain,
            packet_id,
            state: MessageState::Acknowledged,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub(crate) fn assign_packet_id(&mut self, packet_id: u16) {
        self.packet_id = Some(packet_id);
    }

    pub(crate) fn set_state(&mut self, state: MessageState) {
        self.state = state;
    }

    /// Check the payload against a size ceiling (pure function)
    pub(crate) fn check_payload_size(&self, max: usize) -> SessionResult<()> {
        let max = max.min(MAX_PAYLOAD_SIZE);
        if self.payload.len() > max {
            return Err(SessionError::OversizedPayload {
                size: self.payload.len(),
                max,
            });
        }
        Ok(())
    }
}

/// Validate a topic or topic filter.
///
/// Rejects empty topics, embedded NUL characters and empty levels. A single
/// leading separator (`/sensors/temp`) is accepted since it is common on
/// existing brokers.
pub fn validate_topic(topic: &str) -> SessionResult<()> {
    if topic.is_empty() {
        return Err(SessionError::invalid_input("Topic cannot be empty"));
    }

    if topic.contains('\0') {
        return Err(SessionError::invalid_input(
            "Topic cannot contain NUL characters",
        ));
    }

    let levels = topic.strip_prefix('/').unwrap_or(topic);
    if levels.split('/').any(str::is_empty) {
        return Err(SessionError::invalid_input(format!(
            "Topic contains an empty level: {topic}"
        )));
    }

    Ok(())
}

/// Whether a topic contains MQTT wildcard characters
pub fn has_wildcards(topic: &str) -> bool {
    topic.contains('+') || topic.contains('#')
}
