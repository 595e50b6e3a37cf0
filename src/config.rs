//! Broker and session configuration
//!
//! [`BrokerConfig`] and [`SessionOptions`] are the validated values a
//! [`SessionManager`](crate::session::SessionManager) is built from.
//! [`ClientConfig`] is the TOML file form of the same settings.

use crate::error::{SessionError, SessionResult};
use crate::observability::LogMask;
use crate::session::inflight::RetryPolicy;
use crate::session::{Will, MAX_PAYLOAD_SIZE};
use crate::transport::Credentials;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT port
pub const DEFAULT_PORT: u16 = 1883;
/// Default MQTT-over-TLS port
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// Longest identifier the protocol can encode
pub const MAX_IDENTIFIER_LEN: usize = 65_535;

/// Validated connection parameters, captured once per session manager
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    will: Option<Will>,
    credentials: Option<Credentials>,
}

impl BrokerConfig {
    /// Validate host, port and will
    pub fn new(host: impl Into<String>, port: u16, will: Option<Will>) -> SessionResult<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(SessionError::invalid_input("Broker host cannot be empty"));
        }
        if port == 0 {
            return Err(SessionError::invalid_input(
                "Broker port must be in 1..=65535, got 0",
            ));
        }

        Ok(Self {
            host,
            port,
            will,
            credentials: None,
        })
    }

    /// Same as [`BrokerConfig::new`] for ports read from a wider integer
    pub fn with_raw_port(
        host: impl Into<String>,
        port: u32,
        will: Option<Will>,
    ) -> SessionResult<Self> {
        let port = u16::try_from(port).map_err(|_| {
            SessionError::invalid_input(format!("Broker port must be in 1..=65535, got {port}"))
        })?;
        Self::new(host, port, will)
    }

    /// Parse `mqtt://[user[:password]@]host[:port]` (or `mqtts://`)
    pub fn from_url(broker_url: &str) -> SessionResult<Self> {
        let url = Url::parse(broker_url)
            .map_err(|e| SessionError::invalid_input(format!("Invalid broker URL {broker_url}: {e}")))?;

        let default_port = match url.scheme() {
            "mqtt" | "tcp" => DEFAULT_PORT,
            "mqtts" | "ssl" => DEFAULT_TLS_PORT,
            other => {
                return Err(SessionError::invalid_input(format!(
                    "Unsupported broker URL scheme: {other}"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| SessionError::invalid_input(format!("Broker URL has no host: {broker_url}")))?;
        let mut config = Self::new(host, url.port().unwrap_or(default_port), None)?;

        if !url.username().is_empty() {
            config = config.with_credentials(url.username(), url.password())?;
        } else if url.password().is_some() {
            return Err(SessionError::invalid_input(
                "Broker URL has a password without a username",
            ));
        }

        Ok(config)
    }

    /// Attach a will
    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    /// Attach credentials. A password without a username is rejected rather
    /// than silently dropped.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> SessionResult<Self> {
        self.credentials = build_credentials(Some(username.into()), password.map(Into::into))?;
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub(crate) fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }
}

/// Build credentials from optional parts (pure function)
pub fn build_credentials(
    username: Option<String>,
    password: Option<String>,
) -> SessionResult<Option<Credentials>> {
    match (username, password) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(SessionError::invalid_input(
            "A password requires a username",
        )),
        (Some(username), _) if username.is_empty() => {
            Err(SessionError::invalid_input("Username cannot be empty"))
        }
        (Some(username), password) => Ok(Some(Credentials { username, password })),
    }
}

/// Session behavior options
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Keep-alive interval, takes effect on the next connect
    pub keep_alive: Duration,
    /// Clean session flag, takes effect on the next connect
    pub clean_session: bool,
    /// Redelivery policy for unacknowledged messages
    pub retry: RetryPolicy,
    /// Largest payload accepted for publishing
    pub max_payload_size: usize,
    /// Diagnostics the session emits through its log sink
    pub log_mask: LogMask,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            retry: RetryPolicy::default(),
            max_payload_size: MAX_PAYLOAD_SIZE,
            log_mask: LogMask::default(),
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> SessionResult<()> {
        if self.retry.interval.is_zero() {
            return Err(SessionError::invalid_input(
                "Message retry interval must be greater than 0",
            ));
        }
        if self.retry.max_retry_attempts == Some(0) {
            return Err(SessionError::invalid_input(
                "max_retry_attempts must be greater than 0 or None for unlimited",
            ));
        }
        if self.keep_alive.as_secs() > u64::from(u16::MAX) {
            return Err(SessionError::invalid_input(format!(
                "Keep-alive of {}s exceeds the protocol maximum of 65535s",
                self.keep_alive.as_secs()
            )));
        }
        Ok(())
    }
}

/// Validate a client identifier (pure function)
pub fn validate_identifier(identifier: &str) -> SessionResult<()> {
    if identifier.is_empty() {
        return Err(SessionError::invalid_input("Client identifier cannot be empty"));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(SessionError::invalid_input(format!(
            "Client identifier is {} bytes, maximum is {MAX_IDENTIFIER_LEN}",
            identifier.len()
        )));
    }
    if identifier.contains('\0') {
        return Err(SessionError::invalid_input(
            "Client identifier cannot contain NUL characters",
        ));
    }
    Ok(())
}

/// Generate a unique identifier such as `sensor-3f2a9c1e`
pub fn generate_identifier(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// File form of a client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub session: SessionSection,
    pub broker: BrokerSection,
}

/// `[session]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    pub identifier: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_message_retry_secs")]
    pub message_retry_secs: u64,
    /// Maximum resends per message (absent = unlimited)
    pub max_retry_attempts: Option<u32>,
    pub max_payload_size: Option<usize>,
    /// Comma-separated log levels, e.g. `"error,warning"`
    pub log_mask: Option<String>,
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_clean_session() -> bool {
    true
}

fn default_message_retry_secs() -> u64 {
    60
}

/// `[broker]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u32,
    pub username: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    pub will: Option<WillSection>,
}

fn default_port() -> u32 {
    u32::from(DEFAULT_PORT)
}

/// `[broker.will]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WillSection {
    pub topic: String,
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        validate_identifier(&config.session.identifier)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Resolve the broker password from its environment variable
    pub fn broker_password(&self) -> Result<Option<String>, ConfigError> {
        match &self.broker.password_env {
            Some(name) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
            None => Ok(None),
        }
    }

    /// Validate and split into the values a session manager is built from
    pub fn into_parts(self) -> SessionResult<(String, BrokerConfig, SessionOptions)> {
        let password = self.broker_password()?;

        let will = match &self.broker.will {
            Some(w) => {
                Some(Will::new(w.topic.clone(), w.statement.clone().into_bytes(), w.qos)?.retained(w.retain))
            }
            None => None,
        };

        let mut broker = BrokerConfig::with_raw_port(&self.broker.host, self.broker.port, will)?;
        broker.set_credentials(build_credentials(self.broker.username.clone(), password)?);

        let log_mask = match &self.session.log_mask {
            Some(mask) => LogMask::parse(mask).ok_or_else(|| {
                SessionError::from(ConfigError::InvalidConfig(format!(
                    "Unknown log level in log_mask: {mask}"
                )))
            })?,
            None => LogMask::default(),
        };

        let options = SessionOptions {
            keep_alive: Duration::from_secs(self.session.keep_alive_secs),
            clean_session: self.session.clean_session,
            retry: RetryPolicy {
                interval: Duration::from_secs(self.session.message_retry_secs),
                max_retry_attempts: self.session.max_retry_attempts,
            },
            max_payload_size: self.session.max_payload_size.unwrap_or(MAX_PAYLOAD_SIZE),
            log_mask,
        };
        options.validate()?;

        Ok((self.session.identifier, broker, options))
    }
}
