//! Pure translation of session values into rumqttc types

use crate::config::DEFAULT_TLS_PORT;
use crate::session::QoS;
use crate::transport::OpenRequest;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Default largest packet accepted from the broker (256 KiB)
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Default capacity of the rumqttc request channel
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Adapter knobs that are not part of the session's open request
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Force TLS on or off; `None` enables it for the MQTT-over-TLS port
    pub tls: Option<bool>,
    pub max_packet_size: u32,
    pub request_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tls: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

impl EngineSettings {
    pub fn use_tls(&self, port: u16) -> bool {
        self.tls.unwrap_or(port == DEFAULT_TLS_PORT)
    }
}

pub fn to_wire_qos(qos: QoS) -> WireQoS {
    match qos {
        QoS::AtMostOnce => WireQoS::AtMostOnce,
        QoS::AtLeastOnce => WireQoS::AtLeastOnce,
        QoS::ExactlyOnce => WireQoS::ExactlyOnce,
    }
}

pub fn from_wire_qos(qos: WireQoS) -> QoS {
    match qos {
        WireQoS::AtMostOnce => QoS::AtMostOnce,
        WireQoS::AtLeastOnce => QoS::AtLeastOnce,
        WireQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// rumqttc rejects sub-second keep-alives other than zero
fn wire_keep_alive(keep_alive: Duration) -> Duration {
    if keep_alive.is_zero() {
        keep_alive
    } else {
        Duration::from_secs(keep_alive.as_secs().max(1))
    }
}

/// Build MQTT options for one connection attempt (pure function)
pub fn configure_mqtt_options(request: &OpenRequest, settings: &EngineSettings) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(request.identifier.clone(), request.host.clone(), request.port);

    if settings.use_tls(request.port) {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_keep_alive(wire_keep_alive(request.keep_alive));
    mqtt_options.set_clean_start(request.clean_session);
    mqtt_options.set_max_packet_size(Some(settings.max_packet_size));

    // Incoming QoS 1/2 messages are acknowledged by the session
    mqtt_options.set_manual_acks(true);

    if let Some(credentials) = &request.credentials {
        mqtt_options.set_credentials(
            credentials.username.clone(),
            credentials.password.clone().unwrap_or_default(),
        );
    }

    if let Some(will) = &request.will {
        let last_will = LastWill::new(
            will.topic(),
            will.statement().clone(),
            to_wire_qos(will.qos()),
            will.retain(),
            None,
        );
        mqtt_options.set_last_will(last_will);
    }

    mqtt_options
}
