//! Event records shared by the reader, the actors and the correlator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Identity of a simulated actor. Actors are numbered from 1.
pub type ActorId = usize;

/// Broadcast notification kinds the harness can correlate.
///
/// The string form is the wire name used both in the `event:` line and in
/// the embedded `type` field of the JSON payload.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    CardCreated,
    CardUpdated,
    VoteChanged,
    CardsGrouped,
    CardGroupedOnto,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::CardCreated,
        EventKind::CardUpdated,
        EventKind::VoteChanged,
        EventKind::CardsGrouped,
        EventKind::CardGroupedOnto,
    ];
}

/// An action confirmed by the application API.
///
/// Immutable once recorded. `connected_users` fixes the expected fan-out of
/// the event regardless of later joins or leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEvent {
    pub id: String,
    pub kind: EventKind,
    pub key: String,
    pub sender: ActorId,
    pub sent_at: DateTime<Utc>,
    pub connected_users: usize,
}

/// A broadcast notification decoded from an actor's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub kind: EventKind,
    pub key: String,
    /// Filled in by the listening actor; the stream reader does not know it.
    pub receiver: ActorId,
    pub received_at: DateTime<Utc>,
}
