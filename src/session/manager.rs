//! Session manager: connection lifecycle, in-flight tracking and retry
//!
//! All mutation goes through `&mut self`, so one session is driven by one
//! task at a time. Public calls return as soon as local validation passed and
//! the engine accepted the request; outcomes are reported to the delegate as
//! the engine's events are processed by [`SessionManager::poll`] or
//! [`SessionManager::handle_event`].

use super::delegate::SessionDelegate;
use super::inflight::{InFlightTable, RequestKind};
use super::message::Message;
use super::state::{ConnectionResponse, ConnectionState, SessionEvent, StateMachine, Transition};
use crate::config::{build_credentials, validate_identifier, BrokerConfig, SessionOptions};
use crate::error::{SessionError, SessionResult};
use crate::observability::{LogLevel, LogSink, MetricsSnapshot, SessionMetrics, TracingSink};
use crate::transport::{
    IncomingMessage, OpenRequest, OutgoingPublish, TransportEngine, TransportError, TransportEvent,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::Instrument;

/// What one `poll` step woke up for
enum Wakeup {
    Event(Option<TransportEvent>),
    RetryTick,
}

/// Client-side MQTT session bound to a transport engine and a delegate
pub struct SessionManager<E, D>
where
    E: TransportEngine,
    D: SessionDelegate,
{
    identifier: String,
    broker: BrokerConfig,
    options: SessionOptions,
    state: ConnectionState,
    in_flight: InFlightTable,
    engine: E,
    delegate: D,
    log_sink: Arc<dyn LogSink>,
    metrics: Arc<SessionMetrics>,
    retry_timer: Option<Interval>,
    last_open: Option<OpenRequest>,
}

impl<E, D> SessionManager<E, D>
where
    E: TransportEngine,
    D: SessionDelegate,
{
    /// Create a session with default options
    pub fn new(
        identifier: impl Into<String>,
        broker: BrokerConfig,
        engine: E,
        delegate: D,
    ) -> SessionResult<Self> {
        Self::with_options(identifier, broker, SessionOptions::default(), engine, delegate)
    }

    pub fn with_options(
        identifier: impl Into<String>,
        broker: BrokerConfig,
        options: SessionOptions,
        engine: E,
        delegate: D,
    ) -> SessionResult<Self> {
        let identifier = identifier.into();
        validate_identifier(&identifier)?;
        options.validate()?;

        Ok(Self {
            identifier,
            broker,
            options,
            state: ConnectionState::Disconnected,
            in_flight: InFlightTable::new(),
            engine,
            delegate,
            log_sink: Arc::new(TracingSink),
            metrics: Arc::new(SessionMetrics::new()),
            retry_timer: None,
            last_open: None,
        })
    }

    /// Route this session's diagnostics to another sink
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn in_flight(&self) -> &InFlightTable {
        &self.in_flight
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Shared handle to this session's counters
    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.in_flight.len())
    }

    /// Set the keep-alive interval; takes effect on the next connect
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> SessionResult<()> {
        let mut options = self.options.clone();
        options.keep_alive = keep_alive;
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Set the clean session flag; takes effect on the next connect
    pub fn set_clean_session(&mut self, clean_session: bool) {
        self.options.clean_session = clean_session;
    }

    /// Set the message retry interval; takes effect immediately
    pub fn set_message_retry(&mut self, interval: Duration) -> SessionResult<()> {
        let mut options = self.options.clone();
        options.retry.interval = interval;
        options.validate()?;
        self.options = options;
        if self.retry_timer.is_some() {
            self.arm_retry_timer();
        }
        Ok(())
    }

    /// Set or clear credentials; takes effect on the next connect.
    /// A password without a username is rejected.
    pub fn set_credentials(
        &mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> SessionResult<()> {
        let credentials = build_credentials(username, password)?;
        self.broker.set_credentials(credentials);
        Ok(())
    }

    /// Open the connection.
    ///
    /// Returns once the engine accepted the request. The broker's answer is
    /// reported through `did_receive_connection_response`. Calling this while
    /// already connecting or connected is a no-op.
    pub async fn connect(&mut self) -> SessionResult<()> {
        validate_identifier(&self.identifier)?;
        self.options.validate()?;

        let request = OpenRequest {
            identifier: self.identifier.clone(),
            host: self.broker.host().to_string(),
            port: self.broker.port(),
            keep_alive: self.options.keep_alive,
            clean_session: self.options.clean_session,
            credentials: self.broker.credentials().cloned(),
            will: self.broker.will().cloned(),
        };
        self.open(request).await
    }

    /// Reopen with the parameters captured by the last `connect`
    pub async fn reconnect(&mut self) -> SessionResult<()> {
        let request = self.last_open.clone().ok_or(SessionError::NoConnection {
            state: self.state,
        })?;
        self.open(request).await
    }

    async fn open(&mut self, request: OpenRequest) -> SessionResult<()> {
        match StateMachine::transition(self.state, SessionEvent::ConnectRequested) {
            Transition::Move(next) => self.state = next,
            _ if matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) =>
            {
                self.log(
                    LogLevel::Debug,
                    format_args!("connect ignored, session is already {}", self.state),
                );
                return Ok(());
            }
            _ => {
                return Err(SessionError::invalid_input(format!(
                    "Cannot connect while {}",
                    self.state
                )))
            }
        }

        self.metrics.record_connection_attempt();
        self.log(
            LogLevel::Notice,
            format_args!(
                "connecting to {}:{} (keep_alive={}s, clean_session={})",
                request.host,
                request.port,
                request.keep_alive.as_secs(),
                request.clean_session
            ),
        );

        let span = crate::mqtt_span!(operation = "open", client_id = %self.identifier);
        match self.engine.open(request.clone()).instrument(span).await {
            Ok(()) => {
                self.last_open = Some(request);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.log(LogLevel::Error, format_args!("failed to open connection: {e}"));
                Err(e.into())
            }
        }
    }

    /// Close the connection gracefully.
    ///
    /// Cancels retry and, with clean session, drops every in-flight message.
    /// `did_disconnect` fires when the engine confirms.
    pub async fn disconnect(&mut self) -> SessionResult<()> {
        match StateMachine::transition(self.state, SessionEvent::DisconnectRequested) {
            Transition::Move(next) => self.state = next,
            _ => return Err(SessionError::NoConnection { state: self.state }),
        }

        self.retry_timer = None;
        if self.clean_session_in_effect() {
            self.in_flight.clear();
        }
        self.log(LogLevel::Notice, format_args!("disconnecting"));

        let span = crate::mqtt_span!(operation = "close", client_id = %self.identifier);
        if let Err(e) = self.engine.close().instrument(span).await {
            // Nothing left to close; finish the teardown locally
            self.log(
                LogLevel::Warning,
                format_args!("engine close failed, treating as disconnected: {e}"),
            );
            self.on_transport_closed(true);
        }
        Ok(())
    }

    /// Publish a message. Returns the packet identifier assigned to it.
    pub async fn publish(&mut self, message: Message) -> SessionResult<u16> {
        self.check_connected()?;
        message.check_payload_size(self.options.max_payload_size)?;
        let packet_id = self.dispatch(RequestKind::Publish, message).await?;
        self.metrics.record_message_published();
        Ok(packet_id)
    }

    /// Subscribe to a topic filter. Returns the packet identifier.
    pub async fn subscribe(&mut self, message: Message) -> SessionResult<u16> {
        self.check_connected()?;
        self.dispatch(RequestKind::Subscribe, message).await
    }

    /// Unsubscribe from a topic filter. Returns the packet identifier.
    pub async fn unsubscribe(&mut self, message: Message) -> SessionResult<u16> {
        self.check_connected()?;
        self.dispatch(RequestKind::Unsubscribe, message).await
    }

    /// Clean session flag of the connection last opened; options only apply
    /// from the next connect
    fn clean_session_in_effect(&self) -> bool {
        self.last_open
            .as_ref()
            .map_or(self.options.clean_session, |request| request.clean_session)
    }

    fn check_connected(&self) -> SessionResult<()> {
        if !StateMachine::accepts_requests(self.state) {
            return Err(SessionError::NoConnection { state: self.state });
        }
        Ok(())
    }

    /// Register a message and hand it to the engine
    async fn dispatch(&mut self, kind: RequestKind, message: Message) -> SessionResult<u16> {
        let packet_id = self.in_flight.register(kind, message, Instant::now())?;

        if let Err(e) = self.send(packet_id, false).await {
            self.in_flight.discard(packet_id);
            self.log(
                LogLevel::Error,
                format_args!("engine rejected {kind:?} {packet_id}: {e}"),
            );
            return Err(e.into());
        }

        self.log(
            LogLevel::Debug,
            format_args!("{kind:?} {packet_id} handed to engine"),
        );
        Ok(packet_id)
    }

    /// Send (or resend) the in-flight entry with this identifier
    async fn send(&mut self, packet_id: u16, duplicate: bool) -> Result<(), TransportError> {
        let Some(entry) = self.in_flight.get(packet_id) else {
            return Ok(());
        };
        let kind = entry.kind;
        let message = entry.message.clone();

        match kind {
            RequestKind::Publish => {
                self.engine
                    .publish(OutgoingPublish {
                        topic: message.topic().to_string(),
                        payload: message.payload().clone(),
                        qos: message.qos(),
                        retain: message.retain(),
                        packet_id,
                        duplicate,
                    })
                    .await
            }
            RequestKind::Subscribe => {
                self.engine
                    .subscribe(message.topic(), message.qos(), packet_id)
                    .await
            }
            RequestKind::Unsubscribe => self.engine.unsubscribe(message.topic(), packet_id).await,
        }
    }

    /// Resend every message awaiting acknowledgement whose last send is at
    /// least one retry interval old. Messages over the configured retry
    /// ceiling are failed and reported through `did_fail_delivery`.
    /// Returns how many messages were resent.
    pub async fn resend_expired(&mut self, now: Instant) -> usize {
        if !self.is_connected() {
            return 0;
        }

        let scan = self.in_flight.scan_for_retry(now, &self.options.retry);

        for packet_id in scan.exhausted {
            if let Some(entry) = self.in_flight.fail(packet_id) {
                self.metrics.record_message_failed();
                self.log(
                    LogLevel::Warning,
                    format_args!(
                        "giving up on {:?} {packet_id} after {} retries",
                        entry.kind, entry.retries
                    ),
                );
                self.delegate.did_fail_delivery(&entry.message);
            }
        }

        let mut resent = 0;
        for packet_id in scan.resend {
            self.in_flight.mark_resent(packet_id, now);
            match self.send(packet_id, true).await {
                Ok(()) => {
                    resent += 1;
                    self.metrics.record_message_retried();
                    self.log(LogLevel::Debug, format_args!("resent {packet_id}"));
                }
                Err(e) => {
                    // Stays in flight; the next interval tries again
                    self.log(
                        LogLevel::Warning,
                        format_args!("resend of {packet_id} failed: {e}"),
                    );
                }
            }
        }
        resent
    }

    /// Resend everything awaiting acknowledgement, used after a connection
    /// is re-established with a persistent session
    async fn redeliver_pending(&mut self) {
        let now = Instant::now();
        for packet_id in self.in_flight.awaiting_ack() {
            self.in_flight.mark_resent(packet_id, now);
            if let Err(e) = self.send(packet_id, true).await {
                self.log(
                    LogLevel::Warning,
                    format_args!("redelivery of {packet_id} failed: {e}"),
                );
            } else {
                self.metrics.record_message_retried();
            }
        }
    }

    /// Wait for the next engine event or retry tick and process it.
    ///
    /// Returns false once the engine has no more events to report (it was
    /// never opened, or its connection ended and every event was consumed).
    pub async fn poll(&mut self) -> bool {
        let wakeup = match self.retry_timer.as_mut() {
            Some(timer) => tokio::select! {
                event = self.engine.next_event() => Wakeup::Event(event),
                _ = timer.tick() => Wakeup::RetryTick,
            },
            None => Wakeup::Event(self.engine.next_event().await),
        };

        match wakeup {
            Wakeup::Event(Some(event)) => {
                self.handle_event(event).await;
                true
            }
            Wakeup::Event(None) => false,
            Wakeup::RetryTick => {
                self.resend_expired(Instant::now()).await;
                true
            }
        }
    }

    /// Drive the session until the engine's event stream ends
    pub async fn run(&mut self) {
        let span = crate::session_span!(client_id = %self.identifier);
        async {
            while self.poll().await {}
        }
        .instrument(span)
        .await
    }

    /// Reconcile one engine event against the session state
    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionResult(response) => {
                self.on_connection_result(response).await
            }
            TransportEvent::Disconnected { graceful } => self.on_transport_closed(graceful),
            TransportEvent::PublishAck(packet_id) => {
                self.on_ack(RequestKind::Publish, packet_id)
            }
            TransportEvent::SubscribeAck(packet_id) => {
                self.on_ack(RequestKind::Subscribe, packet_id)
            }
            TransportEvent::UnsubscribeAck(packet_id) => {
                self.on_ack(RequestKind::Unsubscribe, packet_id)
            }
            TransportEvent::Message(incoming) => self.on_message(incoming).await,
        }
    }

    async fn on_connection_result(&mut self, response: ConnectionResponse) {
        let previous = self.state;
        let next = match StateMachine::transition(
            previous,
            SessionEvent::ConnectionResult(response),
        ) {
            Transition::Move(next) => next,
            _ => {
                self.log(
                    LogLevel::Debug,
                    format_args!("ignoring connection result {response:?} while {}", self.state),
                );
                return;
            }
        };
        self.state = next;

        if previous == ConnectionState::Disconnecting {
            self.log(
                LogLevel::Notice,
                format_args!("connection attempt ended with {response:?} during disconnect"),
            );
            self.finish_teardown(previous, true);
            return;
        }

        if next == ConnectionState::Connected {
            self.metrics.record_connection_established();
            self.log(LogLevel::Notice, format_args!("connected"));
            self.arm_retry_timer();
            self.delegate.did_receive_connection_response(response);

            if self.clean_session_in_effect() {
                self.in_flight.clear();
            } else {
                self.redeliver_pending().await;
            }
        } else {
            self.metrics.record_connection_refused();
            self.log(
                LogLevel::Error,
                format_args!("connection refused: {response:?}"),
            );
            self.delegate.did_receive_connection_response(response);
        }
    }

    fn on_transport_closed(&mut self, graceful: bool) {
        let previous = self.state;
        match StateMachine::transition(previous, SessionEvent::TransportClosed) {
            Transition::Move(next) => self.state = next,
            _ => {
                self.log(
                    LogLevel::Debug,
                    format_args!("ignoring disconnect while {previous}"),
                );
                return;
            }
        }
        self.finish_teardown(previous, graceful);
    }

    /// Apply the in-flight retention rule and report the disconnect
    fn finish_teardown(&mut self, previous: ConnectionState, graceful: bool) {
        self.retry_timer = None;
        if self.clean_session_in_effect() {
            self.in_flight.clear();
        } else {
            self.in_flight.retain_awaiting_ack();
        }

        self.metrics.record_disconnection();
        if graceful || previous == ConnectionState::Disconnecting {
            self.log(LogLevel::Notice, format_args!("disconnected"));
        } else {
            self.log(
                LogLevel::Warning,
                format_args!(
                    "connection lost while {previous}, {} message(s) kept for redelivery",
                    self.in_flight.len()
                ),
            );
        }
        self.delegate.did_disconnect();
    }

    fn on_ack(&mut self, kind: RequestKind, packet_id: u16) {
        let matches_kind = self
            .in_flight
            .get(packet_id)
            .is_some_and(|entry| entry.kind == kind);
        if !matches_kind {
            self.metrics.record_unknown_ack();
            self.log(
                LogLevel::Warning,
                format_args!("ignoring {kind:?} ack for unknown packet {packet_id}"),
            );
            return;
        }

        let Some(entry) = self.in_flight.acknowledge(packet_id) else {
            return;
        };
        self.metrics.record_message_acknowledged();
        self.log(LogLevel::Debug, format_args!("{kind:?} {packet_id} acknowledged"));

        match kind {
            RequestKind::Publish => self.delegate.did_publish(&entry.message),
            RequestKind::Subscribe => self.delegate.did_subscribe(&entry.message),
            RequestKind::Unsubscribe => self.delegate.did_unsubscribe(&entry.message),
        }
    }

    async fn on_message(&mut self, incoming: IncomingMessage) {
        if incoming.qos.requires_ack() {
            if let Some(packet_id) = incoming.packet_id {
                if let Err(e) = self.engine.acknowledge(packet_id).await {
                    self.log(
                        LogLevel::Warning,
                        format_args!("failed to acknowledge incoming {packet_id}: {e}"),
                    );
                }
            }
        }

        self.metrics.record_message_received();
        let message = Message::incoming(
            incoming.topic,
            incoming.payload,
            incoming.qos,
            incoming.retain,
            incoming.packet_id,
        );
        self.delegate.did_receive_message(&message);
    }

    fn arm_retry_timer(&mut self) {
        let period = self.options.retry.interval;
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.retry_timer = Some(timer);
    }

    fn log(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        if self.options.log_mask.contains(level) {
            self.log_sink.log(&self.identifier, level, message);
        }
    }

    /// Disconnect if needed and release the engine
    pub async fn shutdown(mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            if let Err(e) = self.disconnect().await {
                self.log(
                    LogLevel::Warning,
                    format_args!("disconnect during shutdown failed: {e}"),
                );
            }
        }
    }
}
