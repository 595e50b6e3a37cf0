//! MQTT client session management
//!
//! The module is split into focused sub-modules:
//!
//! - [`message`] - Message values, QoS and topic validation
//! - [`will`] - Last will message
//! - [`state`] - Pure connection state transitions
//! - [`inflight`] - In-flight table, packet identifiers and retry decisions
//! - [`delegate`] - Outward notification contract
//! - [`manager`] - The session manager coordinating all of the above with a
//!   transport engine
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::config::BrokerConfig;
//! use mqtt_session::session::{Message, NoopDelegate, SessionManager};
//! use mqtt_session::transport::mqtt::RumqttcEngine;
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerConfig::new("broker.local", 1883, None)?;
//! let mut session = SessionManager::new("sensor-1", broker, RumqttcEngine::new(), NoopDelegate)?;
//! session.connect().await?;
//! while session.poll().await {
//!     if session.is_connected() {
//!         session.publish(Message::new("sensors/temp", vec![0x17], 1, false)?).await?;
//!         break;
//!     }
//! }
//! # Ok::<(), mqtt_session::SessionError>(())
//! # });
//! ```

pub mod delegate;
pub mod inflight;
pub mod manager;
pub mod message;
pub mod state;
pub mod will;

// Re-export public types for convenience
pub use delegate::{NoopDelegate, SessionDelegate};
pub use inflight::{InFlightEntry, InFlightTable, RequestKind, RetryPolicy};
pub use manager::SessionManager;
pub use message::{validate_topic, Message, MessageState, QoS, MAX_PAYLOAD_SIZE};
pub use state::{ConnectionResponse, ConnectionState, StateMachine, Transition};
pub use will::Will;
