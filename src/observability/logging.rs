//! Structured logging using the tracing crate
//!
//! Two layers live here:
//!
//! - process setup ([`init_logging`], [`init_default_logging`]) for binaries
//!   embedding the session layer, and
//! - the per-session [`LogMask`] and [`LogSink`] a session manager emits its
//!   own diagnostics through. There is no process-wide mask: each session
//!   carries its own.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)

use std::env;
use std::fmt;
use std::ops::BitOr;
use tracing::Level;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a log level name, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn span_events(include_spans: bool) -> tracing_fmt::format::FmtSpan {
    if include_spans {
        tracing_fmt::format::FmtSpan::NEW | tracing_fmt::format::FmtSpan::CLOSE
    } else {
        tracing_fmt::format::FmtSpan::NONE
    }
}

fn build_filter(level: Level) -> EnvFilter {
    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    for directive in ["rumqttc=warn", "tokio=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize logging with manual configuration.
/// Returns false if a global subscriber was already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) -> bool {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => {
            let fmt_layer = tracing_fmt::layer()
                .json()
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(span_events(include_spans));
            subscriber.with(fmt_layer).try_init()
        }
    };

    result.is_ok()
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> bool {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .eq_ignore_ascii_case("true");

    init_logging(level, format, include_spans)
}

/// Severity category of a session diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    fn bit(self) -> u8 {
        match self {
            LogLevel::Error => 0x01,
            LogLevel::Warning => 0x02,
            LogLevel::Notice => 0x04,
            LogLevel::Info => 0x08,
            LogLevel::Debug => 0x10,
        }
    }
}

/// Set of log levels a session emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMask(u8);

impl LogMask {
    pub const NONE: LogMask = LogMask(0);
    pub const ERROR: LogMask = LogMask(0x01);
    pub const WARNING: LogMask = LogMask(0x02);
    pub const NOTICE: LogMask = LogMask(0x04);
    pub const INFO: LogMask = LogMask(0x08);
    pub const DEBUG: LogMask = LogMask(0x10);
    pub const ALL: LogMask = LogMask(0x1f);

    pub fn contains(self, level: LogLevel) -> bool {
        self.0 & level.bit() != 0
    }

    /// Parse a comma-separated list such as `"error,warning,notice"`
    pub fn parse(s: &str) -> Option<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(LogMask::NONE, |mask, part| {
                let level = match part.to_lowercase().as_str() {
                    "error" => LogMask::ERROR,
                    "warning" | "warn" => LogMask::WARNING,
                    "notice" => LogMask::NOTICE,
                    "info" => LogMask::INFO,
                    "debug" => LogMask::DEBUG,
                    "all" => LogMask::ALL,
                    "none" => LogMask::NONE,
                    _ => return None,
                };
                Some(mask | level)
            })
    }
}

impl Default for LogMask {
    fn default() -> Self {
        LogMask::ERROR | LogMask::WARNING | LogMask::NOTICE | LogMask::INFO
    }
}

impl BitOr for LogMask {
    type Output = LogMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        LogMask(self.0 | rhs.0)
    }
}

/// Destination for session diagnostics
pub trait LogSink: Send + Sync {
    fn log(&self, identifier: &str, level: LogLevel, message: fmt::Arguments<'_>);
}

/// Sink forwarding to the tracing macros
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, identifier: &str, level: LogLevel, message: fmt::Arguments<'_>) {
        match level {
            LogLevel::Error => tracing::error!(target: "mqtt_session", client_id = %identifier, "{}", message),
            LogLevel::Warning => tracing::warn!(target: "mqtt_session", client_id = %identifier, "{}", message),
            LogLevel::Notice | LogLevel::Info => {
                tracing::info!(target: "mqtt_session", client_id = %identifier, "{}", message)
            }
            LogLevel::Debug => tracing::debug!(target: "mqtt_session", client_id = %identifier, "{}", message),
        }
    }
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Create a session lifecycle span
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("session_lifecycle", $($field)*)
    };
}

pub use {mqtt_span, session_span};
