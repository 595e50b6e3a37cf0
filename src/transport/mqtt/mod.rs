//! rumqttc-backed transport engine
//!
//! The module separates pure translation from I/O:
//!
//! - [`options`] - Pure mapping of open requests onto `MqttOptions`
//! - [`event_mapper`] - Pure event routing and packet-id correlation
//! - [`engine`] - The [`RumqttcEngine`] owning the client and its event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::transport::mqtt::{EngineSettings, RumqttcEngine};
//!
//! let engine = RumqttcEngine::with_settings(EngineSettings {
//!     tls: Some(true),
//!     ..Default::default()
//! });
//! ```

pub mod engine;
pub mod event_mapper;
pub mod options;

// Re-export public types for convenience
pub use engine::RumqttcEngine;
pub use event_mapper::{Binding, Correlator, EventRoute};
pub use options::{configure_mqtt_options, EngineSettings};
