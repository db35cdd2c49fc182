//! Correlation-key extraction.
//!
//! Each notification kind carries its identifying field at a different place
//! in the payload, so the lookup is an explicit table of JSON pointers tried
//! in order.

use serde_json::Value;
use std::str::FromStr;

use crate::event::EventKind;

const CARD_KEYS: &[&str] = &["/card/id", "/card_id", "/cardId"];
const VOTE_KEYS: &[&str] = &["/card_id", "/cardId"];
const GROUP_KEYS: &[&str] = &["/groupId"];
const GROUPED_ONTO_KEYS: &[&str] = &["/cardId"];

/// Pointers to try for `kind`, in priority order.
pub fn key_sources(kind: EventKind) -> &'static [&'static str] {
    match kind {
        EventKind::CardCreated | EventKind::CardUpdated => CARD_KEYS,
        EventKind::VoteChanged => VOTE_KEYS,
        EventKind::CardsGrouped => GROUP_KEYS,
        EventKind::CardGroupedOnto => GROUPED_ONTO_KEYS,
    }
}

/// First string found at one of `kind`'s key sources.
///
/// The first string-typed match decides: an empty string there yields `None`
/// rather than falling through to a later source.
pub fn extract_key(kind: EventKind, payload: &Value) -> Option<String> {
    key_sources(kind)
        .iter()
        .find_map(|pointer| payload.pointer(pointer)?.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// Resolve the kind and key of a decoded payload.
///
/// A non-empty top-level `type` string in the payload overrides the stream's
/// `event:` type. Unknown kinds and payloads without a key yield `None`.
pub fn resolve(stream_type: &str, payload: &Value) -> Option<(EventKind, String)> {
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(stream_type);

    let kind = EventKind::from_str(event_type).ok()?;
    let key = extract_key(kind, payload)?;
    Some((kind, key))
}
