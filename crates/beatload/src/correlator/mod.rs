//! Event correlation.
//!
//! The [`EventCorrelator`] is the only state shared between actors. It pairs
//! every action confirmed by the API (a *sent* event) with the broadcast
//! notifications other actors decode from their event streams (*received*
//! events), tolerating notifications that arrive before the action that caused
//! them has been recorded.
//!
//! All bookkeeping lives behind a single [`RwLock`]: mutations take the write
//! side, reporting and monitoring snapshots take the read side.

mod stats;

pub use stats::{DeliveryReport, LatencyStats, TypeStats};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use crate::event::{ActorId, EventKind, ReceivedEvent, SentEvent};

/// Shared ledger of sent actions and their deliveries.
#[derive(Debug, Default)]
pub struct EventCorrelator {
    inner: RwLock<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Sent events in recording order.
    sent: Vec<SentEvent>,
    /// Delivery ledger per sent event, parallel to `sent`.
    deliveries: Vec<HashMap<ActorId, DateTime<Utc>>>,
    /// `(kind, key)` -> indices into `sent`.
    by_key: HashMap<(EventKind, String), Vec<usize>>,
    /// Notifications that arrived before any matching sent event.
    pending: Vec<ReceivedEvent>,
    /// One sample per ledger entry.
    latencies: Vec<TimeDelta>,
    /// Total ledger entries across all events.
    delivered: usize,
    /// Snapshotted into every new sent event.
    connected_users: usize,
}

impl Ledger {
    /// Index of the most recently sent event for `(kind, key)`.
    ///
    /// Ties on the send timestamp resolve to the later recording.
    fn latest_match(&self, kind: EventKind, key: &str) -> Option<usize> {
        self.by_key
            .get(&(kind, key.to_owned()))?
            .iter()
            .copied()
            .reduce(|best, idx| {
                if self.sent[idx].sent_at >= self.sent[best].sent_at {
                    idx
                } else {
                    best
                }
            })
    }

    /// Add `receiver` to the ledger of event `idx`. Returns the latency when
    /// the receiver was not already recorded.
    fn deliver(
        &mut self,
        idx: usize,
        receiver: ActorId,
        received_at: DateTime<Utc>,
    ) -> Option<TimeDelta> {
        let receivers = &mut self.deliveries[idx];
        if receivers.contains_key(&receiver) {
            return None;
        }
        receivers.insert(receiver, received_at);

        let latency = received_at - self.sent[idx].sent_at;
        self.latencies.push(latency);
        self.delivered += 1;
        Some(latency)
    }
}

impl EventCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action confirmed by the API, stamped with the current time.
    ///
    /// Returns the run-unique event id.
    pub fn record_sent(&self, kind: EventKind, key: impl Into<String>, sender: ActorId) -> String {
        let mut ledger = self.inner.write();
        let sent_at = Utc::now();
        Self::insert_sent(&mut ledger, kind, key.into(), sender, sent_at)
    }

    /// Record an action with an explicit send timestamp.
    pub fn record_sent_at(
        &self,
        kind: EventKind,
        key: impl Into<String>,
        sender: ActorId,
        sent_at: DateTime<Utc>,
    ) -> String {
        let mut ledger = self.inner.write();
        Self::insert_sent(&mut ledger, kind, key.into(), sender, sent_at)
    }

    fn insert_sent(
        ledger: &mut Ledger,
        kind: EventKind,
        key: String,
        sender: ActorId,
        sent_at: DateTime<Utc>,
    ) -> String {
        let idx = ledger.sent.len();
        let nanos = sent_at.timestamp_nanos_opt().unwrap_or_default();
        let id = format!("{kind}_{key}_{nanos}_{sender}_{idx}");

        ledger.sent.push(SentEvent {
            id: id.clone(),
            kind,
            key: key.clone(),
            sender,
            sent_at,
            connected_users: ledger.connected_users,
        });
        ledger.deliveries.push(HashMap::new());
        ledger
            .by_key
            .entry((kind, key.clone()))
            .or_default()
            .push(idx);

        // Claim notifications that beat this record, keeping the rest in order.
        let pending = std::mem::take(&mut ledger.pending);
        let (matched, remaining): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| p.kind == kind && p.key == key);
        ledger.pending = remaining;

        for p in matched {
            match ledger.deliver(idx, p.receiver, p.received_at) {
                Some(latency) => debug!(
                    %kind,
                    key = %key,
                    receiver = p.receiver,
                    latency_ms = latency.num_milliseconds(),
                    "Matched pending event"
                ),
                None => trace!(
                    %kind,
                    key = %key,
                    receiver = p.receiver,
                    "Dropped duplicate pending event"
                ),
            }
        }

        id
    }

    /// Record a notification decoded by `receiver`'s event stream.
    ///
    /// Matches the most recent sent event with the same kind and key. A
    /// receiver is counted at most once per event. Without a match the
    /// notification waits in the pending buffer for its sent event.
    pub fn record_received(
        &self,
        kind: EventKind,
        key: &str,
        receiver: ActorId,
        received_at: DateTime<Utc>,
    ) {
        let mut ledger = self.inner.write();

        match ledger.latest_match(kind, key) {
            Some(idx) => {
                if let Some(latency) = ledger.deliver(idx, receiver, received_at) {
                    debug!(
                        %kind,
                        key,
                        receiver,
                        latency_ms = latency.num_milliseconds(),
                        "Event matched"
                    );
                }
            }
            None => {
                ledger.pending.push(ReceivedEvent {
                    kind,
                    key: key.to_owned(),
                    receiver,
                    received_at,
                });
                debug!(%kind, key, receiver, "Pending event (will match later)");
            }
        }
    }

    /// Build the delivery report. Read-only, so it can run while actors drain.
    pub fn generate_report(&self, total_connected_users: usize) -> DeliveryReport {
        let ledger = self.inner.read();

        let mut by_type: BTreeMap<EventKind, TypeStats> = BTreeMap::new();
        for (event, receivers) in ledger.sent.iter().zip(&ledger.deliveries) {
            let stats = by_type.entry(event.kind).or_default();
            stats.sent += 1;
            stats.expected += event.connected_users as u64;
            stats.received += receivers.len() as u64;
        }

        let mut report = DeliveryReport {
            connected_users: total_connected_users,
            events_sent: ledger.sent.len() as u64,
            latency: LatencyStats::from_samples(&ledger.latencies),
            ..Default::default()
        };
        for stats in by_type.values_mut() {
            stats.finish();
            report.events_expected += stats.expected;
            report.events_received += stats.received;
        }
        report.by_type = by_type;
        report
    }

    /// `(sent events, ledger entries)` for periodic monitoring.
    pub fn stats(&self) -> (usize, usize) {
        let ledger = self.inner.read();
        (ledger.sent.len(), ledger.delivered)
    }

    /// Set the connected-user count snapshotted by later sends.
    pub fn set_connected_users(&self, count: usize) {
        self.inner.write().connected_users = count;
    }

    /// Number of notifications still waiting for their sent event.
    pub fn pending_len(&self) -> usize {
        self.inner.read().pending.len()
    }

    /// Copy of every recorded latency sample, in recording order.
    pub fn latency_samples(&self) -> Vec<TimeDelta> {
        self.inner.read().latencies.clone()
    }

    /// The sent event recorded under `event_id`.
    pub fn sent_event(&self, event_id: &str) -> Option<SentEvent> {
        let ledger = self.inner.read();
        ledger.sent.iter().find(|e| e.id == event_id).cloned()
    }

    /// Receivers recorded for `event_id`, sorted by receiver.
    pub fn receivers(&self, event_id: &str) -> Option<Vec<(ActorId, DateTime<Utc>)>> {
        let ledger = self.inner.read();
        let idx = ledger.sent.iter().position(|e| e.id == event_id)?;
        let mut receivers: Vec<_> = ledger.deliveries[idx]
            .iter()
            .map(|(r, t)| (*r, *t))
            .collect();
        receivers.sort_unstable_by_key(|(r, _)| *r);
        Some(receivers)
    }
}
