//! Observability for the session layer: structured logging and per-session metrics

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{
    init_default_logging, init_logging, LogFormat, LogLevel, LogMask, LogSink, TracingSink,
};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{mqtt_span, session_span};
