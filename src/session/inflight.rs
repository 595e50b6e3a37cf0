//! In-flight message table, packet identifier allocation and retry decisions

use super::message::{Message, MessageState};
use crate::error::{SessionError, SessionResult};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Which operation a tracked message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// Redelivery configuration for unacknowledged messages
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Minimum age since the last send before a message is resent
    pub interval: Duration,
    /// Maximum number of resends per message (None = unlimited)
    pub max_retry_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_retry_attempts: None, // Unlimited redelivery by default
        }
    }
}

/// What to do with one unacknowledged message (pure decision)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NotDue,
    Resend,
    Exhausted,
}

impl RetryPolicy {
    pub fn decide(&self, age: Duration, retries: u32) -> RetryDecision {
        if age < self.interval {
            return RetryDecision::NotDue;
        }
        match self.max_retry_attempts {
            Some(max) if retries >= max => RetryDecision::Exhausted,
            _ => RetryDecision::Resend,
        }
    }
}

/// A message handed to the engine and not yet settled
#[derive(Debug, Clone)]
pub struct InFlightEntry {
    pub kind: RequestKind,
    pub message: Message,
    pub last_sent: Instant,
    pub retries: u32,
}

/// Messages that were due at a retry scan
#[derive(Debug, Default, PartialEq)]
pub struct RetryScan {
    pub resend: Vec<u16>,
    pub exhausted: Vec<u16>,
}

/// Table of in-flight messages keyed by packet identifier
#[derive(Debug)]
pub struct InFlightTable {
    entries: BTreeMap<u16, InFlightEntry>,
    next_id: u16,
}

impl Default for InFlightTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Allocate the next free packet identifier.
    /// Identifiers increase monotonically, wrap from 65535 to 1 and skip any
    /// identifier still in the table.
    pub fn allocate_id(&mut self) -> SessionResult<u16> {
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(SessionError::out_of_memory(
                "all 65535 packet identifiers are in flight",
            ));
        }

        loop {
            let candidate = self.next_id;
            self.next_id = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Register a message under a fresh identifier. QoS-0 publishes are
    /// recorded as `Sent`, everything else as `AwaitingAck`.
    pub fn register(
        &mut self,
        kind: RequestKind,
        mut message: Message,
        now: Instant,
    ) -> SessionResult<u16> {
        let packet_id = self.allocate_id()?;
        message.assign_packet_id(packet_id);
        message.set_state(Self::initial_state(kind, &message));
        self.entries.insert(
            packet_id,
            InFlightEntry {
                kind,
                message,
                last_sent: now,
                retries: 0,
            },
        );
        Ok(packet_id)
    }

    /// State a message enters when handed to the engine (pure function)
    pub fn initial_state(kind: RequestKind, message: &Message) -> MessageState {
        match kind {
            RequestKind::Publish if !message.qos().requires_ack() => MessageState::Sent,
            // SUBSCRIBE and UNSUBSCRIBE are always acknowledged by the broker
            _ => MessageState::AwaitingAck,
        }
    }

    /// Settle a message. Returns `None` for unknown identifiers.
    pub fn acknowledge(&mut self, packet_id: u16) -> Option<InFlightEntry> {
        let mut entry = self.entries.remove(&packet_id)?;
        entry.message.set_state(MessageState::Acknowledged);
        Some(entry)
    }

    /// Remove a message as failed
    pub fn fail(&mut self, packet_id: u16) -> Option<InFlightEntry> {
        let mut entry = self.entries.remove(&packet_id)?;
        entry.message.set_state(MessageState::Failed);
        Some(entry)
    }

    /// Drop a message without settling it (hand-off to the engine failed)
    pub fn discard(&mut self, packet_id: u16) -> Option<InFlightEntry> {
        self.entries.remove(&packet_id)
    }

    pub fn get(&self, packet_id: u16) -> Option<&InFlightEntry> {
        self.entries.get(&packet_id)
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.entries.contains_key(&packet_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u16, &InFlightEntry)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keep only messages awaiting acknowledgement; fire-and-forget entries
    /// do not survive a lost connection.
    pub fn retain_awaiting_ack(&mut self) {
        self.entries
            .retain(|_, entry| entry.message.state() == MessageState::AwaitingAck);
    }

    /// Identifiers awaiting acknowledgement, oldest send first
    pub fn awaiting_ack(&self) -> Vec<u16> {
        let mut ids: Vec<(Instant, u16)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.message.state() == MessageState::AwaitingAck)
            .map(|(id, entry)| (entry.last_sent, *id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Decide which messages must be resent or given up at `now` (pure scan)
    pub fn scan_for_retry(&self, now: Instant, policy: &RetryPolicy) -> RetryScan {
        let mut scan = RetryScan::default();
        for id in self.awaiting_ack() {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let age = now.saturating_duration_since(entry.last_sent);
            match policy.decide(age, entry.retries) {
                RetryDecision::NotDue => {}
                RetryDecision::Resend => scan.resend.push(id),
                RetryDecision::Exhausted => scan.exhausted.push(id),
            }
        }
        scan
    }

    /// Record a resend of a message
    pub fn mark_resent(&mut self, packet_id: u16, now: Instant) -> Option<&InFlightEntry> {
        let entry = self.entries.get_mut(&packet_id)?;
        entry.last_sent = now;
        entry.retries = entry.retries.saturating_add(1);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn publish(qos: u8) -> Message {
        Message::new("sensors/temp", vec![0x17], qos, false).unwrap()
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(60));
        assert_eq!(policy.max_retry_attempts, None);
    }

    #[test]
    fn test_retry_decision() {
        let policy = RetryPolicy {
            interval: Duration::from_secs(10),
            max_retry_attempts: Some(2),
        };
        assert_eq!(policy.decide(Duration::from_secs(9), 0), RetryDecision::NotDue);
        assert_eq!(policy.decide(Duration::from_secs(10), 0), RetryDecision::Resend);
        assert_eq!(policy.decide(Duration::from_secs(10), 1), RetryDecision::Resend);
        assert_eq!(
            policy.decide(Duration::from_secs(10), 2),
            RetryDecision::Exhausted
        );

        let unlimited = RetryPolicy::default();
        assert_eq!(
            unlimited.decide(Duration::from_secs(600), 10_000),
            RetryDecision::Resend
        );
    }

    #[test]
    fn test_register_assigns_ids_and_states() {
        let mut table = InFlightTable::new();
        let now = Instant::now();

        let qos0 = table.register(RequestKind::Publish, publish(0), now).unwrap();
        let qos1 = table.register(RequestKind::Publish, publish(1), now).unwrap();
        let sub = table
            .register(RequestKind::Subscribe, Message::filter("a/#", 0).unwrap(), now)
            .unwrap();

        assert_eq!((qos0, qos1, sub), (1, 2, 3));
        assert_eq!(table.get(qos0).unwrap().message.state(), MessageState::Sent);
        assert_eq!(
            table.get(qos1).unwrap().message.state(),
            MessageState::AwaitingAck
        );
        assert_eq!(
            table.get(sub).unwrap().message.state(),
            MessageState::AwaitingAck
        );
        assert_eq!(table.get(qos1).unwrap().message.packet_id(), Some(qos1));
    }

    #[test]
    fn test_allocation_wraps_and_skips_live_ids() {
        let mut table = InFlightTable::new();
        let now = Instant::now();
        table.next_id = u16::MAX;

        let last = table.register(RequestKind::Publish, publish(1), now).unwrap();
        assert_eq!(last, u16::MAX);

        let first = table.register(RequestKind::Publish, publish(1), now).unwrap();
        assert_eq!(first, 1);

        // Force the counter back onto a live identifier
        table.next_id = u16::MAX;
        let next = table.register(RequestKind::Publish, publish(1), now).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_register_fails_when_every_identifier_is_in_flight() {
        let mut table = InFlightTable::new();
        let now = Instant::now();
        for expected in 1..=u16::MAX {
            let packet_id = table.register(RequestKind::Publish, publish(1), now).unwrap();
            assert_eq!(packet_id, expected);
        }
        assert_eq!(table.len(), usize::from(u16::MAX));
        let next_id = table.next_id;

        let result = table.register(RequestKind::Publish, publish(1), now);

        assert!(matches!(result, Err(SessionError::OutOfMemory { .. })));
        assert_eq!(table.len(), usize::from(u16::MAX));
        assert_eq!(table.next_id, next_id);

        // Settling one message frees its identifier again
        table.acknowledge(300).unwrap();
        assert_eq!(
            table.register(RequestKind::Publish, publish(1), now).unwrap(),
            300
        );
    }

    #[test]
    fn test_acknowledge_unknown_is_none() {
        let mut table = InFlightTable::new();
        table
            .register(RequestKind::Publish, publish(1), Instant::now())
            .unwrap();
        assert!(table.acknowledge(42).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_acknowledge_and_fail_set_terminal_state() {
        let mut table = InFlightTable::new();
        let now = Instant::now();
        let a = table.register(RequestKind::Publish, publish(1), now).unwrap();
        let b = table.register(RequestKind::Publish, publish(2), now).unwrap();

        let acked = table.acknowledge(a).unwrap();
        assert_eq!(acked.message.state(), MessageState::Acknowledged);
        let failed = table.fail(b).unwrap();
        assert_eq!(failed.message.state(), MessageState::Failed);
        assert!(table.is_empty());
    }

    #[test]
    fn test_retain_awaiting_ack_drops_fire_and_forget() {
        let mut table = InFlightTable::new();
        let now = Instant::now();
        table.register(RequestKind::Publish, publish(0), now).unwrap();
        let kept = table.register(RequestKind::Publish, publish(1), now).unwrap();

        table.retain_awaiting_ack();
        assert_eq!(table.len(), 1);
        assert!(table.contains(kept));
    }

    #[test]
    fn test_scan_for_retry() {
        let mut table = InFlightTable::new();
        let start = Instant::now();
        let policy = RetryPolicy {
            interval: Duration::from_secs(60),
            max_retry_attempts: Some(1),
        };

        let qos0 = table.register(RequestKind::Publish, publish(0), start).unwrap();
        let qos1 = table.register(RequestKind::Publish, publish(1), start).unwrap();

        assert_eq!(
            table.scan_for_retry(start + Duration::from_secs(59), &policy),
            RetryScan::default()
        );

        let later = start + Duration::from_secs(61);
        let scan = table.scan_for_retry(later, &policy);
        assert_eq!(scan.resend, vec![qos1]);
        assert!(!scan.resend.contains(&qos0));

        table.mark_resent(qos1, later);
        assert_eq!(table.get(qos1).unwrap().retries, 1);

        let scan = table.scan_for_retry(later + Duration::from_secs(61), &policy);
        assert_eq!(scan.exhausted, vec![qos1]);
    }

    #[test]
    fn test_awaiting_ack_ordered_by_last_send() {
        let mut table = InFlightTable::new();
        let start = Instant::now();
        let a = table.register(RequestKind::Publish, publish(1), start).unwrap();
        let b = table
            .register(RequestKind::Unsubscribe, Message::filter("x", 0).unwrap(), start)
            .unwrap();
        table.mark_resent(a, start + Duration::from_secs(5));
        assert_eq!(table.awaiting_ack(), vec![b, a]);
    }

    proptest! {
        #[test]
        fn allocated_ids_are_unique_and_nonzero(count in 1usize..512) {
            let mut table = InFlightTable::new();
            let now = Instant::now();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..count {
                let message = Message::new("t", Bytes::new(), 1, false).unwrap();
                let id = table.register(RequestKind::Publish, message, now).unwrap();
                prop_assert!(id != 0);
                prop_assert!(seen.insert(id));
            }
        }
    }
}
