//! Delivery accounting and latency distribution.

use chrono::TimeDelta;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::event::EventKind;

/// Delivery accounting for one event kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeStats {
    /// Events of this kind confirmed by the API.
    pub sent: u64,
    /// Sum of the connected-user snapshots taken when each event was sent.
    pub expected: u64,
    /// Ledger entries across all events of this kind.
    pub received: u64,
    /// `expected - received`; negative when more receivers showed up than were
    /// connected at send time.
    pub missed: i64,
    /// Delivery percentage, 100 when nothing was expected.
    pub rate: f64,
}

impl TypeStats {
    pub(crate) fn finish(&mut self) {
        self.missed = self.expected as i64 - self.received as i64;
        self.rate = if self.expected > 0 {
            self.received as f64 / self.expected as f64 * 100.0
        } else {
            100.0
        };
    }
}

/// Latency distribution over every matched delivery.
///
/// Latencies are signed: a notification matched out of the pending buffer can
/// carry a receive time earlier than the send record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    #[serde(serialize_with = "as_millis")]
    pub mean: TimeDelta,
    #[serde(serialize_with = "as_millis")]
    pub p50: TimeDelta,
    #[serde(serialize_with = "as_millis")]
    pub p90: TimeDelta,
    #[serde(serialize_with = "as_millis")]
    pub p95: TimeDelta,
    #[serde(serialize_with = "as_millis")]
    pub p99: TimeDelta,
    #[serde(serialize_with = "as_millis")]
    pub max: TimeDelta,
}

impl LatencyStats {
    /// Compute the distribution of `samples`.
    ///
    /// Percentiles use the nearest rank without interpolation: the sample at
    /// index `floor(p * n)` of the ascending order. An empty set yields all
    /// zeros.
    pub fn from_samples(samples: &[TimeDelta]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let n = sorted.len();
        let sum: i128 = sorted.iter().map(|d| nanos(*d) as i128).sum();
        let mean = TimeDelta::nanoseconds((sum / n as i128) as i64);

        Self {
            count: n,
            mean,
            p50: nearest_rank(&sorted, 0.50),
            p90: nearest_rank(&sorted, 0.90),
            p95: nearest_rank(&sorted, 0.95),
            p99: nearest_rank(&sorted, 0.99),
            max: sorted[n - 1],
        }
    }
}

fn nearest_rank(sorted: &[TimeDelta], p: f64) -> TimeDelta {
    let idx = (sorted.len() as f64 * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn nanos(delta: TimeDelta) -> i64 {
    delta
        .num_nanoseconds()
        .unwrap_or(if delta < TimeDelta::zero() { i64::MIN } else { i64::MAX })
}

fn as_millis<S: Serializer>(delta: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(nanos(*delta) as f64 / 1_000_000.0)
}

/// Snapshot of the correlator's ledger produced at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    /// Connected actors at report time, as supplied by the caller.
    pub connected_users: usize,
    pub events_sent: u64,
    pub events_expected: u64,
    pub events_received: u64,
    pub by_type: BTreeMap<EventKind, TypeStats>,
    pub latency: LatencyStats,
}

impl DeliveryReport {
    /// Overall delivery percentage; 0 when nothing was expected.
    pub fn delivery_rate(&self) -> f64 {
        if self.events_expected > 0 {
            self.events_received as f64 / self.events_expected as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn events_missed(&self) -> i64 {
        self.events_expected as i64 - self.events_received as i64
    }
}
