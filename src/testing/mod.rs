//! Testing utilities and mock implementations
//!
//! Mocks let session behavior be exercised without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
