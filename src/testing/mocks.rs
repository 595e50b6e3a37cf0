//! Mock implementations for testing
//!
//! Provides a scriptable [`MockEngine`] and a [`RecordingDelegate`] so the
//! session manager can be exercised without a broker.

use crate::session::{ConnectionResponse, Message, QoS, SessionDelegate};
use crate::transport::{
    OpenRequest, OutgoingPublish, TransportEngine, TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Lock a mutex, recovering the data if a panicking test poisoned it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One call the session made on the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Open(OpenRequest),
    Close,
    Publish(OutgoingPublish),
    Subscribe {
        topic_filter: String,
        qos: QoS,
        packet_id: u16,
    },
    Unsubscribe {
        topic_filter: String,
        packet_id: u16,
    },
    Acknowledge(u16),
}

/// Engine that records every call and replays scripted events
pub struct MockEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    should_fail: Arc<AtomicBool>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Test-side handle to a [`MockEngine`]
#[derive(Clone)]
pub struct MockEngineHandle {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    should_fail: Arc<AtomicBool>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
}

impl MockEngine {
    pub fn new() -> (Self, MockEngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let should_fail = Arc::new(AtomicBool::new(false));

        let engine = Self {
            calls: Arc::clone(&calls),
            should_fail: Arc::clone(&should_fail),
            events: rx,
        };
        let handle = MockEngineHandle {
            calls,
            should_fail,
            events: Arc::new(Mutex::new(Some(tx))),
        };
        (engine, handle)
    }

    fn record(&self, call: EngineCall) -> Result<(), TransportError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost(
                "Mock engine failure".to_string(),
            ));
        }
        lock(&self.calls).push(call);
        Ok(())
    }
}

impl MockEngineHandle {
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.calls).clone()
    }

    /// Publishes handed to the engine, in order
    pub fn publishes(&self) -> Vec<OutgoingPublish> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                EngineCall::Publish(publish) => Some(publish.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make every subsequent engine call fail
    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    /// Queue an event for the session's next `poll`
    pub fn push_event(&self, event: TransportEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    /// End the event stream once queued events are consumed
    pub fn close_events(&self) {
        lock(&self.events).take();
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn open(&mut self, request: OpenRequest) -> Result<(), TransportError> {
        self.record(EngineCall::Open(request))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.record(EngineCall::Close)
    }

    async fn publish(&mut self, publish: OutgoingPublish) -> Result<(), TransportError> {
        self.record(EngineCall::Publish(publish))
    }

    async fn subscribe(
        &mut self,
        topic_filter: &str,
        qos: QoS,
        packet_id: u16,
    ) -> Result<(), TransportError> {
        self.record(EngineCall::Subscribe {
            topic_filter: topic_filter.to_string(),
            qos,
            packet_id,
        })
    }

    async fn unsubscribe(&mut self, topic_filter: &str, packet_id: u16) -> Result<(), TransportError> {
        self.record(EngineCall::Unsubscribe {
            topic_filter: topic_filter.to_string(),
            packet_id,
        })
    }

    async fn acknowledge(&mut self, packet_id: u16) -> Result<(), TransportError> {
        self.record(EngineCall::Acknowledge(packet_id))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// One delegate notification
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateEvent {
    ConnectionResponse(ConnectionResponse),
    Disconnected,
    Published(Message),
    Received(Message),
    Subscribed(Message),
    Unsubscribed(Message),
    DeliveryFailed(Message),
}

/// Delegate that records notifications; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingDelegate {
    events: Arc<Mutex<Vec<DelegateEvent>>>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DelegateEvent> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn messages(&self, pick: impl Fn(&DelegateEvent) -> Option<&Message>) -> Vec<Message> {
        lock(&self.events).iter().filter_map(pick).cloned().collect()
    }

    pub fn published(&self) -> Vec<Message> {
        self.messages(|event| match event {
            DelegateEvent::Published(message) => Some(message),
            _ => None,
        })
    }

    pub fn received(&self) -> Vec<Message> {
        self.messages(|event| match event {
            DelegateEvent::Received(message) => Some(message),
            _ => None,
        })
    }

    pub fn subscribed(&self) -> Vec<Message> {
        self.messages(|event| match event {
            DelegateEvent::Subscribed(message) => Some(message),
            _ => None,
        })
    }

    pub fn unsubscribed(&self) -> Vec<Message> {
        self.messages(|event| match event {
            DelegateEvent::Unsubscribed(message) => Some(message),
            _ => None,
        })
    }

    pub fn failed(&self) -> Vec<Message> {
        self.messages(|event| match event {
            DelegateEvent::DeliveryFailed(message) => Some(message),
            _ => None,
        })
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, DelegateEvent::Disconnected))
            .count()
    }

    fn push(&self, event: DelegateEvent) {
        lock(&self.events).push(event);
    }
}

impl SessionDelegate for RecordingDelegate {
    fn did_receive_connection_response(&mut self, response: ConnectionResponse) {
        self.push(DelegateEvent::ConnectionResponse(response));
    }

    fn did_disconnect(&mut self) {
        self.push(DelegateEvent::Disconnected);
    }

    fn did_publish(&mut self, message: &Message) {
        self.push(DelegateEvent::Published(message.clone()));
    }

    fn did_receive_message(&mut self, message: &Message) {
        self.push(DelegateEvent::Received(message.clone()));
    }

    fn did_subscribe(&mut self, message: &Message) {
        self.push(DelegateEvent::Subscribed(message.clone()));
    }

    fn did_unsubscribe(&mut self, message: &Message) {
        self.push(DelegateEvent::Unsubscribed(message.clone()));
    }

    fn did_fail_delivery(&mut self, message: &Message) {
        self.push(DelegateEvent::DeliveryFailed(message.clone()));
    }
}
