//! rumqttc-backed transport engine (impure I/O)

use super::event_mapper::{route_error, route_event, Binding, Correlator, EventRoute};
use super::options::{configure_mqtt_options, from_wire_qos, to_wire_qos, EngineSettings};
use crate::session::{ConnectionResponse, QoS, RequestKind};
use crate::transport::{
    IncomingMessage, OpenRequest, OutgoingPublish, TransportEngine, TransportError, TransportEvent,
};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

fn lock(correlator: &Mutex<Correlator>) -> MutexGuard<'_, Correlator> {
    correlator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport engine driving a rumqttc MQTT 5 client
pub struct RumqttcEngine {
    settings: EngineSettings,
    client: Option<AsyncClient>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    correlator: Arc<Mutex<Correlator>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl Default for RumqttcEngine {
    fn default() -> Self {
        Self::with_settings(EngineSettings::default())
    }
}

impl RumqttcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self {
            settings,
            client: None,
            events: None,
            correlator: Arc::new(Mutex::new(Correlator::new())),
            event_loop_handle: None,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotOpen)
    }

    /// rumqttc redelivers requests it still holds; a resend would duplicate them
    fn still_owned(&self, kind: RequestKind, session_id: u16) -> bool {
        let live = lock(&self.correlator).is_live(kind, session_id);
        if live {
            debug!("Skipping resend of live {:?} {}", kind, session_id);
        }
        live
    }

    fn stop_event_loop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Poll the event loop until the connection ends, translating events
    async fn run_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        correlator: Arc<Mutex<Correlator>>,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) {
        info!("Starting MQTT event loop for client: {}", client_id);
        let mut connected = false;

        loop {
            let route = match event_loop.poll().await {
                Ok(event) => route_event(&event),
                Err(e) => {
                    if connected {
                        error!("MQTT event loop error for client {}: {}", client_id, e);
                    } else {
                        warn!("MQTT connection to broker failed for client {}: {}", client_id, e);
                    }
                    route_error(&e, connected)
                }
            };

            let (event, done) = match route {
                EventRoute::Connected => {
                    connected = true;
                    (
                        Some(TransportEvent::ConnectionResult(ConnectionResponse::Successful)),
                        false,
                    )
                }
                EventRoute::Refused(response) => {
                    (Some(TransportEvent::ConnectionResult(response)), true)
                }
                EventRoute::Received(publish) => {
                    let qos = from_wire_qos(publish.qos);
                    let packet_id = qos.requires_ack().then_some(publish.pkid);
                    let message = IncomingMessage {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.clone(),
                        qos,
                        retain: publish.retain,
                        packet_id,
                    };
                    if packet_id.is_some() {
                        lock(&correlator).hold(publish);
                    }
                    (Some(TransportEvent::Message(message)), false)
                }
                EventRoute::Sent(kind, engine_id) => match lock(&correlator).bind(kind, engine_id) {
                    Binding::Completed(session_id) => {
                        (Some(TransportEvent::PublishAck(session_id)), false)
                    }
                    Binding::Bound(session_id) => {
                        debug!("{:?} {} sent as engine id {}", kind, session_id, engine_id);
                        (None, false)
                    }
                    Binding::Unmatched => (None, false),
                },
                EventRoute::Acked(kind, engine_id) => {
                    let session_id = lock(&correlator).complete(kind, engine_id);
                    let event = session_id.map(|id| match kind {
                        RequestKind::Publish => TransportEvent::PublishAck(id),
                        RequestKind::Subscribe => TransportEvent::SubscribeAck(id),
                        RequestKind::Unsubscribe => TransportEvent::UnsubscribeAck(id),
                    });
                    if event.is_none() {
                        debug!("Ack for unbound engine id {} ({:?})", engine_id, kind);
                    }
                    (event, false)
                }
                EventRoute::Closed { graceful } => {
                    (Some(TransportEvent::Disconnected { graceful }), true)
                }
                EventRoute::Infrastructure => (None, false),
            };

            if let Some(event) = event {
                if tx.send(event).is_err() {
                    debug!("Event receiver dropped, stopping event loop");
                    break;
                }
            }
            if done {
                break;
            }
        }

        info!("MQTT event loop stopped for client: {}", client_id);
    }
}

#[async_trait]
impl TransportEngine for RumqttcEngine {
    async fn open(&mut self, request: OpenRequest) -> Result<(), TransportError> {
        self.stop_event_loop();
        lock(&self.correlator).reset();

        let mqtt_options = configure_mqtt_options(&request, &self.settings);
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.settings.request_capacity);
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(Self::run_event_loop(
            request.identifier.clone(),
            event_loop,
            Arc::clone(&self.correlator),
            tx,
        ));

        self.client = Some(client);
        self.events = Some(rx);
        self.event_loop_handle = Some(handle);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let client = self.client()?.clone();
        client
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }

    async fn publish(&mut self, publish: OutgoingPublish) -> Result<(), TransportError> {
        if publish.duplicate && self.still_owned(RequestKind::Publish, publish.packet_id) {
            return Ok(());
        }

        let client = self.client()?.clone();
        lock(&self.correlator).enqueue(RequestKind::Publish, publish.packet_id);
        let result = client
            .publish(
                publish.topic,
                to_wire_qos(publish.qos),
                publish.retain,
                publish.payload,
            )
            .await;

        result.map_err(|e| {
            lock(&self.correlator).cancel(RequestKind::Publish, publish.packet_id);
            TransportError::ConnectionLost(e.to_string())
        })
    }

    async fn subscribe(
        &mut self,
        topic_filter: &str,
        qos: QoS,
        packet_id: u16,
    ) -> Result<(), TransportError> {
        if self.still_owned(RequestKind::Subscribe, packet_id) {
            return Ok(());
        }
        let client = self.client()?.clone();
        lock(&self.correlator).enqueue(RequestKind::Subscribe, packet_id);
        client
            .subscribe(topic_filter, to_wire_qos(qos))
            .await
            .map_err(|e| {
                lock(&self.correlator).cancel(RequestKind::Subscribe, packet_id);
                TransportError::ConnectionLost(e.to_string())
            })
    }

    async fn unsubscribe(&mut self, topic_filter: &str, packet_id: u16) -> Result<(), TransportError> {
        if self.still_owned(RequestKind::Unsubscribe, packet_id) {
            return Ok(());
        }
        let client = self.client()?.clone();
        lock(&self.correlator).enqueue(RequestKind::Unsubscribe, packet_id);
        client.unsubscribe(topic_filter).await.map_err(|e| {
            lock(&self.correlator).cancel(RequestKind::Unsubscribe, packet_id);
            TransportError::ConnectionLost(e.to_string())
        })
    }

    async fn acknowledge(&mut self, packet_id: u16) -> Result<(), TransportError> {
        let client = self.client()?.clone();
        let Some(publish) = lock(&self.correlator).release(packet_id) else {
            debug!("No held message for incoming packet {}", packet_id);
            return Ok(());
        };
        client
            .ack(&publish)
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RumqttcEngine {
    fn drop(&mut self) {
        // No async work possible here; call close() first for a graceful disconnect
        self.stop_event_loop();
    }
}
