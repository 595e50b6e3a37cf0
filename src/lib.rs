//! mqtt-session
//!
//! A client-side MQTT session layer: connection lifecycle, QoS-aware
//! in-flight tracking, timed redelivery and a delegate event interface, over
//! a pluggable transport engine.
//!
//! # Overview
//!
//! - [`session::SessionManager`] owns the connection state machine and the
//!   in-flight table, and reports outcomes to a [`session::SessionDelegate`]
//! - [`transport::TransportEngine`] is the wire-protocol boundary;
//!   [`transport::mqtt::RumqttcEngine`] implements it over rumqttc
//! - [`config`] validates broker parameters and loads TOML configuration
//! - [`observability`] provides tracing setup, log masks and session metrics
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_session::session::{Message, QoS, Will};
//! use mqtt_session::config::BrokerConfig;
//!
//! let will = Will::new("sensors/sensor-1/status", "offline", 1).unwrap();
//! let broker = BrokerConfig::new("broker.local", 1883, Some(will)).unwrap();
//! assert_eq!(broker.port(), 1883);
//!
//! let reading = Message::new("sensors/temp", vec![0x17], 1, false).unwrap();
//! assert_eq!(reading.qos(), QoS::AtLeastOnce);
//! assert!(Message::new("", vec![], 0, false).is_err());
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{BrokerConfig, ClientConfig, SessionOptions};
pub use error::{SessionError, SessionResult};
pub use session::{
    ConnectionResponse, ConnectionState, Message, MessageState, QoS, SessionDelegate,
    SessionManager, Will,
};
pub use transport::mqtt::RumqttcEngine;
pub use transport::{TransportEngine, TransportError, TransportEvent};
