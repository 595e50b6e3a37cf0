//! Last will and testament
//!
//! The broker publishes the will on the client's behalf when the connection
//! drops without a graceful disconnect.

use super::message::{has_wildcards, validate_topic, QoS};
use crate::error::{SessionError, SessionResult};
use bytes::Bytes;

/// Immutable last-will message registered at connect time
#[derive(Debug, Clone, PartialEq)]
pub struct Will {
    topic: String,
    statement: Bytes,
    qos: QoS,
    retain: bool,
}

impl Will {
    /// Create a will. Fails when the topic is empty or malformed, or the QoS
    /// is outside 0..=2.
    pub fn new(
        topic: impl Into<String>,
        statement: impl Into<Bytes>,
        qos: u8,
    ) -> SessionResult<Self> {
        let topic = topic.into();
        validate_topic(&topic)?;
        if has_wildcards(&topic) {
            return Err(SessionError::invalid_input(format!(
                "Will topic cannot contain wildcards: {topic}"
            )));
        }

        Ok(Self {
            topic,
            statement: statement.into(),
            qos: QoS::try_from(qos)?,
            retain: false,
        })
    }

    /// Ask the broker to retain the will once published
    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn statement(&self) -> &Bytes {
        &self.statement
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
}
