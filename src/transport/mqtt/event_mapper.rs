//! Pure routing of rumqttc events and packet-id correlation
//!
//! rumqttc assigns its own packet identifiers. The [`Correlator`] binds each
//! engine identifier to the session identifier of the request that produced
//! it, relying on rumqttc emitting `Outgoing` events in request order.

use crate::session::{ConnectionResponse, RequestKind};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, Publish};
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Routing decision for one event-loop result
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    Connected,
    /// Broker refused the connection, or it could not be established
    Refused(ConnectionResponse),
    /// Application message from the broker
    Received(Publish),
    /// rumqttc wrote a request under this engine identifier
    Sent(RequestKind, u16),
    /// Broker settled the request with this engine identifier
    Acked(RequestKind, u16),
    /// Connection ended
    Closed { graceful: bool },
    /// Keep-alive and intermediate QoS 2 traffic
    Infrastructure,
}

/// Route an event-loop event (pure function)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(connack) => match connack.code {
                ConnectReturnCode::Success => EventRoute::Connected,
                code => EventRoute::Refused(map_return_code(code)),
            },
            Packet::Publish(publish) => EventRoute::Received(publish.clone()),
            Packet::PubAck(ack) => EventRoute::Acked(RequestKind::Publish, ack.pkid),
            Packet::PubComp(comp) => EventRoute::Acked(RequestKind::Publish, comp.pkid),
            Packet::SubAck(ack) => EventRoute::Acked(RequestKind::Subscribe, ack.pkid),
            Packet::UnsubAck(ack) => EventRoute::Acked(RequestKind::Unsubscribe, ack.pkid),
            Packet::Disconnect(_) => EventRoute::Closed { graceful: false },
            other => {
                debug!("Infrastructure packet: {:?}", other);
                EventRoute::Infrastructure
            }
        },
        Event::Outgoing(outgoing) => match outgoing {
            Outgoing::Publish(pkid) => EventRoute::Sent(RequestKind::Publish, *pkid),
            Outgoing::Subscribe(pkid) => EventRoute::Sent(RequestKind::Subscribe, *pkid),
            Outgoing::Unsubscribe(pkid) => EventRoute::Sent(RequestKind::Unsubscribe, *pkid),
            Outgoing::Disconnect => EventRoute::Closed { graceful: true },
            _ => EventRoute::Infrastructure,
        },
    }
}

/// Route an event-loop error (pure function).
///
/// Before the broker answered, a failure is reported as a connection
/// result so the session leaves `Connecting` with a response.
pub fn route_error(error: &ConnectionError, connected: bool) -> EventRoute {
    match error {
        ConnectionError::ConnectionRefused(code) => EventRoute::Refused(map_return_code(*code)),
        _ if !connected => EventRoute::Refused(ConnectionResponse::UnavailableBroker),
        _ => EventRoute::Closed { graceful: false },
    }
}

/// Collapse an MQTT 5 reason code onto the session's responses (pure function)
pub fn map_return_code(code: ConnectReturnCode) -> ConnectionResponse {
    match code {
        ConnectReturnCode::Success => ConnectionResponse::Successful,
        ConnectReturnCode::RefusedProtocolVersion
        | ConnectReturnCode::UnsupportedProtocolVersion => {
            ConnectionResponse::UnacceptableProtocolVersion
        }
        ConnectReturnCode::BadClientId | ConnectReturnCode::ClientIdentifierNotValid => {
            ConnectionResponse::RejectedIdentifier
        }
        ConnectReturnCode::BadUserNamePassword => ConnectionResponse::BadCredentials,
        ConnectReturnCode::NotAuthorized | ConnectReturnCode::Banned => {
            ConnectionResponse::NotAuthorized
        }
        _ => ConnectionResponse::UnavailableBroker,
    }
}

/// Outcome of binding an `Outgoing` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Engine id now maps to this session id
    Bound(u16),
    /// QoS 0 publish written; nothing further will arrive for it
    Completed(u16),
    /// Retransmission of an already bound id, or no request pending
    Unmatched,
}

/// Packet-id bookkeeping shared by the engine and its event-loop task
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<RequestKind, VecDeque<u16>>,
    by_engine_id: HashMap<(RequestKind, u16), u16>,
    by_session_id: HashMap<(RequestKind, u16), u16>,
    held: HashMap<u16, Publish>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request about to be handed to rumqttc
    pub fn enqueue(&mut self, kind: RequestKind, session_id: u16) {
        self.pending.entry(kind).or_default().push_back(session_id);
    }

    /// Withdraw a request rumqttc refused to take
    pub fn cancel(&mut self, kind: RequestKind, session_id: u16) {
        if let Some(queue) = self.pending.get_mut(&kind) {
            if let Some(pos) = queue.iter().rposition(|id| *id == session_id) {
                queue.remove(pos);
            }
        }
    }

    /// Bind the engine id rumqttc used for the oldest pending request
    pub fn bind(&mut self, kind: RequestKind, engine_id: u16) -> Binding {
        if engine_id != 0 && self.by_engine_id.contains_key(&(kind, engine_id)) {
            return Binding::Unmatched;
        }
        let Some(session_id) = self.pending.get_mut(&kind).and_then(VecDeque::pop_front) else {
            return Binding::Unmatched;
        };
        if engine_id == 0 {
            return Binding::Completed(session_id);
        }
        self.by_engine_id.insert((kind, engine_id), session_id);
        self.by_session_id.insert((kind, session_id), engine_id);
        Binding::Bound(session_id)
    }

    /// Release the binding for an acknowledged engine id
    pub fn complete(&mut self, kind: RequestKind, engine_id: u16) -> Option<u16> {
        let session_id = self.by_engine_id.remove(&(kind, engine_id))?;
        self.by_session_id.remove(&(kind, session_id));
        Some(session_id)
    }

    /// Whether rumqttc still owns a request for this session id, queued or
    /// awaiting its ack
    pub fn is_live(&self, kind: RequestKind, session_id: u16) -> bool {
        self.by_session_id.contains_key(&(kind, session_id))
            || self
                .pending
                .get(&kind)
                .is_some_and(|queue| queue.contains(&session_id))
    }

    /// Keep an incoming publish until the session acknowledges it
    pub fn hold(&mut self, publish: Publish) {
        self.held.insert(publish.pkid, publish);
    }

    pub fn release(&mut self, pkid: u16) -> Option<Publish> {
        self.held.remove(&pkid)
    }

    /// Forget everything; used when a new connection starts
    pub fn reset(&mut self) {
        self.pending.clear();
        self.by_engine_id.clear();
        self.by_session_id.clear();
        self.held.clear();
    }
}
