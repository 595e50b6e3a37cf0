//! Per-session delivery metrics
//!
//! Counters are atomics so a snapshot can be taken from another task while
//! the session keeps running. Each session owns its own collector.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe counters for one session
#[derive(Debug, Default)]
pub struct SessionMetrics {
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_refusals: AtomicU64,
    disconnections: AtomicU64,
    messages_published: AtomicU64,
    messages_acknowledged: AtomicU64,
    messages_retried: AtomicU64,
    messages_failed: AtomicU64,
    messages_received: AtomicU64,
    unknown_acks: AtomicU64,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_refusals: u64,
    pub disconnections: u64,
    pub messages_published: u64,
    pub messages_acknowledged: u64,
    pub messages_retried: u64,
    pub messages_failed: u64,
    pub messages_received: u64,
    pub unknown_acks: u64,
    pub in_flight: usize,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_connected_at.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn record_connection_refused(&self) {
        self.connection_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnection(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_acknowledged(&self) {
        self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_retried(&self) {
        self.messages_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_ack(&self) {
        self.unknown_acks.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters; `in_flight` is supplied by the session
    pub fn snapshot(&self, in_flight: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_refusals: self.connection_refusals.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
            messages_retried: self.messages_retried.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            unknown_acks: self.unknown_acks.load(Ordering::Relaxed),
            in_flight,
            last_connected_at: self.last_connected_at.lock().ok().and_then(|last| *last),
        }
    }
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
