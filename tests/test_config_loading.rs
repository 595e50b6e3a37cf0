//! Configuration loading and validation tests
//!
//! Tests focus on the values a session is built from, not on TOML parsing
//! details.

use mqtt_session::config::{ClientConfig, ConfigError};
use mqtt_session::observability::{LogLevel, LogMask};
use mqtt_session::session::QoS;
use mqtt_session::SessionError;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[session]
identifier = "sensor-1"
keep_alive_secs = 45
clean_session = false
message_retry_secs = 20
max_retry_attempts = 5
log_mask = "error,warning"

[broker]
host = "broker.local"
port = 1884
username = "device"

[broker.will]
topic = "sensors/sensor-1/status"
statement = "offline"
qos = 1
retain = true
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.session.identifier, "sensor-1");
    assert_eq!(config.broker.port, 1884);

    let (identifier, broker, options) = config.into_parts().unwrap();
    assert_eq!(identifier, "sensor-1");
    assert_eq!(broker.host(), "broker.local");
    assert_eq!(broker.port(), 1884);
    assert_eq!(broker.credentials().unwrap().username, "device");
    assert_eq!(broker.credentials().unwrap().password, None);

    let will = broker.will().unwrap();
    assert_eq!(will.topic(), "sensors/sensor-1/status");
    assert_eq!(will.statement().as_ref(), b"offline");
    assert_eq!(will.qos(), QoS::AtLeastOnce);
    assert!(will.retain());

    assert_eq!(options.keep_alive, Duration::from_secs(45));
    assert!(!options.clean_session);
    assert_eq!(options.retry.interval, Duration::from_secs(20));
    assert_eq!(options.retry.max_retry_attempts, Some(5));
    assert_eq!(options.log_mask, LogMask::ERROR | LogMask::WARNING);
}

#[test]
fn test_config_defaults_for_missing_fields() {
    let config = ClientConfig::from_toml(
        r#"
[session]
identifier = "sensor-2"

[broker]
host = "broker.local"
"#,
    )
    .unwrap();

    let (_, broker, options) = config.into_parts().unwrap();
    assert_eq!(broker.port(), 1883);
    assert!(broker.will().is_none());
    assert!(broker.credentials().is_none());
    assert_eq!(options.keep_alive, Duration::from_secs(30));
    assert!(options.clean_session);
    assert_eq!(options.retry.interval, Duration::from_secs(60));
    assert_eq!(options.retry.max_retry_attempts, None);
    assert!(!options.log_mask.contains(LogLevel::Debug));
}

#[test]
fn test_password_resolved_from_environment() {
    std::env::set_var("MQTT_SESSION_TEST_PASSWORD", "s3cret");
    let config = ClientConfig::from_toml(
        r#"
[session]
identifier = "sensor-3"

[broker]
host = "broker.local"
username = "device"
password_env = "MQTT_SESSION_TEST_PASSWORD"
"#,
    )
    .unwrap();

    let (_, broker, _) = config.into_parts().unwrap();
    assert_eq!(
        broker.credentials().unwrap().password.as_deref(),
        Some("s3cret")
    );
    // Debug output never shows the password
    assert!(!format!("{broker:?}").contains("s3cret"));
}

#[test]
fn test_missing_password_variable_is_reported() {
    let config = ClientConfig::from_toml(
        r#"
[session]
identifier = "sensor-4"

[broker]
host = "broker.local"
username = "device"
password_env = "MQTT_SESSION_TEST_UNSET_VARIABLE"
"#,
    )
    .unwrap();

    assert!(matches!(
        config.into_parts(),
        Err(SessionError::Config(ConfigError::EnvVarNotFound(_)))
    ));
}

#[test]
fn test_invalid_values_are_rejected() {
    let port_out_of_range = ClientConfig::from_toml(
        r#"
[session]
identifier = "sensor-5"

[broker]
host = "broker.local"
port = 70000
"#,
    )
    .unwrap();
    assert!(matches!(
        port_out_of_range.into_parts(),
        Err(SessionError::InvalidInput { .. })
    ));

    let bad_will_qos = ClientConfig::from_toml(
        r#"
[session]
identifier = "sensor-5"

[broker]
host = "broker.local"

[broker.will]
topic = "status"
qos = 3
"#,
    )
    .unwrap();
    assert!(bad_will_qos.into_parts().is_err());

    let bad_mask = ClientConfig::from_toml(
        r#"
[session]
identifier = "sensor-5"
log_mask = "error,chatty"

[broker]
host = "broker.local"
"#,
    )
    .unwrap();
    assert!(matches!(
        bad_mask.into_parts(),
        Err(SessionError::Config(ConfigError::InvalidConfig(_)))
    ));
}

#[test]
fn test_empty_identifier_rejected_at_load() {
    let result = ClientConfig::from_toml(
        r#"
[session]
identifier = ""

[broker]
host = "broker.local"
"#,
    );
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_malformed_toml_and_missing_file() {
    assert!(matches!(
        ClientConfig::from_toml("[session\nidentifier ="),
        Err(ConfigError::TomlParse(_))
    ));
    assert!(matches!(
        ClientConfig::load_from_file(std::path::Path::new("/nonexistent/mqtt-session.toml")),
        Err(ConfigError::FileRead(_))
    ));
}
