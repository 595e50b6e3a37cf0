//! Pure connection state transitions
//!
//! The session manager feeds every lifecycle trigger through
//! [`StateMachine::transition`], which decides the next state without doing
//! any I/O. Keeping the table here lets it be tested exhaustively.

use serde::Serialize;
use std::fmt;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Broker answer to a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionResponse {
    Successful,
    UnacceptableProtocolVersion,
    RejectedIdentifier,
    UnavailableBroker,
    BadCredentials,
    NotAuthorized,
}

impl ConnectionResponse {
    /// MQTT 3.1 CONNACK return code
    pub fn code(self) -> u8 {
        match self {
            ConnectionResponse::Successful => 0,
            ConnectionResponse::UnacceptableProtocolVersion => 1,
            ConnectionResponse::RejectedIdentifier => 2,
            ConnectionResponse::UnavailableBroker => 3,
            ConnectionResponse::BadCredentials => 4,
            ConnectionResponse::NotAuthorized => 5,
        }
    }

    /// Map a MQTT 3.1 return code; unknown codes are treated as an
    /// unavailable broker.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ConnectionResponse::Successful,
            1 => ConnectionResponse::UnacceptableProtocolVersion,
            2 => ConnectionResponse::RejectedIdentifier,
            4 => ConnectionResponse::BadCredentials,
            5 => ConnectionResponse::NotAuthorized,
            _ => ConnectionResponse::UnavailableBroker,
        }
    }

    pub fn is_success(self) -> bool {
        self == ConnectionResponse::Successful
    }
}

/// Lifecycle triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    ConnectionResult(ConnectionResponse),
    DisconnectRequested,
    /// Engine confirmed the connection is closed (graceful or not)
    TransportClosed,
}

/// Outcome of applying a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state
    Move(ConnectionState),
    /// Trigger not valid in the current state; nothing changes
    Rejected,
    /// Stale or duplicate trigger; nothing changes
    Ignored,
}

/// Pure connection state machine
pub struct StateMachine;

impl StateMachine {
    /// Determine the next state for a trigger (pure function)
    pub fn transition(current: ConnectionState, event: SessionEvent) -> Transition {
        use ConnectionState::*;

        match (current, event) {
            (Disconnected, SessionEvent::ConnectRequested) => Transition::Move(Connecting),
            (_, SessionEvent::ConnectRequested) => Transition::Rejected,

            (Connecting, SessionEvent::ConnectionResult(response)) => {
                if response.is_success() {
                    Transition::Move(Connected)
                } else {
                    Transition::Move(Disconnected)
                }
            }
            // The close never reaches a broker that refused us
            (Disconnecting, SessionEvent::ConnectionResult(response))
                if !response.is_success() =>
            {
                Transition::Move(Disconnected)
            }
            (_, SessionEvent::ConnectionResult(_)) => Transition::Ignored,

            (Connecting | Connected, SessionEvent::DisconnectRequested) => {
                Transition::Move(Disconnecting)
            }
            (_, SessionEvent::DisconnectRequested) => Transition::Rejected,

            (Disconnected, SessionEvent::TransportClosed) => Transition::Ignored,
            (_, SessionEvent::TransportClosed) => Transition::Move(Disconnected),
        }
    }

    /// Check if the state allows publish, subscribe and unsubscribe (pure function)
    pub fn accepts_requests(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL_STATES: [ConnectionState; 4] = [Disconnected, Connecting, Connected, Disconnecting];

    #[test]
    fn test_connect_only_from_disconnected() {
        for state in ALL_STATES {
            let transition = StateMachine::transition(state, SessionEvent::ConnectRequested);
            if state == Disconnected {
                assert_eq!(transition, Transition::Move(Connecting));
            } else {
                assert_eq!(transition, Transition::Rejected, "from {state}");
            }
        }
    }

    #[test]
    fn test_connection_result_while_connecting() {
        assert_eq!(
            StateMachine::transition(
                Connecting,
                SessionEvent::ConnectionResult(ConnectionResponse::Successful)
            ),
            Transition::Move(Connected)
        );
        assert_eq!(
            StateMachine::transition(
                Connecting,
                SessionEvent::ConnectionResult(ConnectionResponse::RejectedIdentifier)
            ),
            Transition::Move(Disconnected)
        );
    }

    #[test]
    fn test_refusal_while_disconnecting_completes_disconnect() {
        assert_eq!(
            StateMachine::transition(
                Disconnecting,
                SessionEvent::ConnectionResult(ConnectionResponse::UnavailableBroker)
            ),
            Transition::Move(Disconnected)
        );
    }

    #[test]
    fn test_stale_connection_result_ignored() {
        for state in [Disconnected, Connected, Disconnecting] {
            assert_eq!(
                StateMachine::transition(
                    state,
                    SessionEvent::ConnectionResult(ConnectionResponse::Successful)
                ),
                Transition::Ignored
            );
        }
    }

    #[test]
    fn test_disconnect_from_connecting_or_connected() {
        assert_eq!(
            StateMachine::transition(Connecting, SessionEvent::DisconnectRequested),
            Transition::Move(Disconnecting)
        );
        assert_eq!(
            StateMachine::transition(Connected, SessionEvent::DisconnectRequested),
            Transition::Move(Disconnecting)
        );
        assert_eq!(
            StateMachine::transition(Disconnected, SessionEvent::DisconnectRequested),
            Transition::Rejected
        );
        assert_eq!(
            StateMachine::transition(Disconnecting, SessionEvent::DisconnectRequested),
            Transition::Rejected
        );
    }

    #[test]
    fn test_transport_closed_forces_disconnected() {
        for state in [Connecting, Connected, Disconnecting] {
            assert_eq!(
                StateMachine::transition(state, SessionEvent::TransportClosed),
                Transition::Move(Disconnected)
            );
        }
        assert_eq!(
            StateMachine::transition(Disconnected, SessionEvent::TransportClosed),
            Transition::Ignored
        );
    }

    #[test]
    fn test_accepts_requests_only_when_connected() {
        for state in ALL_STATES {
            assert_eq!(StateMachine::accepts_requests(state), state == Connected);
        }
    }

    #[test]
    fn test_response_codes_round_trip_known_values() {
        for code in 0..=5u8 {
            assert_eq!(ConnectionResponse::from_code(code).code(), code);
        }
        assert_eq!(
            ConnectionResponse::from_code(0x87),
            ConnectionResponse::UnavailableBroker
        );
    }
}
