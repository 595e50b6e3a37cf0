//! Error taxonomy for the MQTT session layer
//!
//! Local validation failures are returned synchronously from the call that
//! triggered them. Engine failures are mapped from [`TransportError`] so the
//! session never exposes an engine-specific representation.

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Not connected - current state: {state}")]
    NoConnection { state: crate::session::ConnectionState },

    #[error("Payload of {size} bytes exceeds maximum of {max} bytes")]
    OversizedPayload { size: usize, max: usize },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Connection refused: {response:?}")]
    ConnectionRefused {
        response: crate::session::ConnectionResponse,
    },

    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Out of memory: {message}")]
    OutOfMemory { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Create connection lost error
    pub fn connection_lost<S: Into<String>>(message: S) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Create out of memory error
    pub fn out_of_memory<S: Into<String>>(message: S) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// True for errors detected locally, before any network I/O
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidInput { .. }
                | SessionError::NoConnection { .. }
                | SessionError::OversizedPayload { .. }
                | SessionError::Config(_)
        )
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Protocol(message) => SessionError::ProtocolError { message },
            TransportError::Refused(response) => SessionError::ConnectionRefused { response },
            TransportError::ConnectionLost(message) => SessionError::ConnectionLost { message },
            TransportError::NotOpen => {
                SessionError::connection_lost("transport engine is not open")
            }
            TransportError::ResourceExhausted(message) => SessionError::OutOfMemory { message },
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ConnectionResponse, ConnectionState};

    #[test]
    fn test_invalid_input_constructor() {
        let error = SessionError::invalid_input("empty topic");
        assert!(matches!(error, SessionError::InvalidInput { .. }));
        assert_eq!(error.to_string(), "Invalid input: empty topic");
    }

    #[test]
    fn test_no_connection_display_names_state() {
        let error = SessionError::NoConnection {
            state: ConnectionState::Connecting,
        };
        assert_eq!(error.to_string(), "Not connected - current state: connecting");
    }

    #[test]
    fn test_oversized_payload_display() {
        let error = SessionError::OversizedPayload { size: 20, max: 10 };
        assert!(error.to_string().contains("20"));
        assert!(error.to_string().contains("10"));
    }

    #[test]
    fn test_transport_errors_map_to_local_taxonomy() {
        assert!(matches!(
            SessionError::from(TransportError::Protocol("bad".into())),
            SessionError::ProtocolError { .. }
        ));
        assert!(matches!(
            SessionError::from(TransportError::Refused(ConnectionResponse::RejectedIdentifier)),
            SessionError::ConnectionRefused {
                response: ConnectionResponse::RejectedIdentifier
            }
        ));
        assert!(matches!(
            SessionError::from(TransportError::ConnectionLost("reset".into())),
            SessionError::ConnectionLost { .. }
        ));
        assert!(matches!(
            SessionError::from(TransportError::NotOpen),
            SessionError::ConnectionLost { .. }
        ));
        assert!(matches!(
            SessionError::from(TransportError::ResourceExhausted("queue full".into())),
            SessionError::OutOfMemory { .. }
        ));
    }

    #[test]
    fn test_local_errors_are_flagged() {
        assert!(SessionError::invalid_input("x").is_local());
        assert!(SessionError::OversizedPayload { size: 2, max: 1 }.is_local());
        assert!(!SessionError::connection_lost("x").is_local());
        assert!(!SessionError::protocol("x").is_local());
    }
}
