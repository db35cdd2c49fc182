//! Per-actor event stream reader.
//!
//! Owns one long-lived stream, decodes it with [`SseCodec`], captures the
//! handshake client id and forwards keyed notifications to the owning actor.
//! Forwarding never blocks: when the actor's queue is full the newest event
//! is dropped.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::codec::{SseCodec, SseFrame};
use super::keys;
use crate::error::{Error, Result};
use crate::event::EventKind;

/// Event type of the handshake block.
pub const HANDSHAKE_EVENT: &str = "connected";

/// Raw body of an event stream connection.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A keyed notification decoded from the stream, not yet tagged with its
/// receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub key: String,
    pub received_at: DateTime<Utc>,
}

/// What a decoded frame means to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handshake carrying the server-assigned client id.
    Handshake(String),
    /// Correlatable notification.
    Event { kind: EventKind, key: String },
    /// Malformed, unknown or unkeyed; dropped silently.
    Skip,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Handshake {
    client_id: String,
}

/// Classify one frame.
pub fn classify(frame: &SseFrame) -> Dispatch {
    if frame.event == HANDSHAKE_EVENT {
        return match serde_json::from_str::<Handshake>(&frame.data) {
            Ok(h) if !h.client_id.is_empty() => Dispatch::Handshake(h.client_id),
            _ => Dispatch::Skip,
        };
    }

    let payload: serde_json::Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(e) => {
            trace!(event = %frame.event, error = %e, "Failed to parse event data");
            return Dispatch::Skip;
        }
    };

    match keys::resolve(&frame.event, &payload) {
        Some((kind, key)) => Dispatch::Event { kind, key },
        None => Dispatch::Skip,
    }
}

/// Lifecycle of a reader as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Reading,
    Closed,
}

/// Handle to a running reader task.
pub struct SseReader {
    client_id: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SseReader {
    /// Start reading `stream`, forwarding notifications to `events`.
    ///
    /// The reader stops on peer close, on a read error or when `cancel` fires.
    pub fn spawn(
        stream: ByteStream,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (id_tx, id_rx) = watch::channel(None);
        let task = tokio::spawn(read_loop(stream, events, id_tx, cancel.clone()));
        Self {
            client_id: id_rx,
            cancel,
            task,
        }
    }

    /// Client id from the handshake, once received.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.borrow().clone()
    }

    /// Wait for the handshake, bounded by `timeout`.
    pub async fn wait_for_handshake(&mut self, timeout: Duration) -> Result<String> {
        let wait = self.client_id.wait_for(Option::is_some);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(id)) => Ok(id.clone().unwrap_or_default()),
            Ok(Err(_)) => Err(Error::stream("event stream closed before handshake")),
            Err(_) => Err(Error::HandshakeTimeout(timeout)),
        }
    }

    pub fn state(&self) -> ReaderState {
        if self.task.is_finished() {
            ReaderState::Closed
        } else {
            ReaderState::Reading
        }
    }

    /// Stop reading. Safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait for the read task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn read_loop(
    stream: ByteStream,
    events: mpsc::Sender<StreamEvent>,
    client_id: watch::Sender<Option<String>>,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(StreamReader::new(stream), SseCodec::new());
    let mut dropped: u64 = 0;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Event stream cancelled");
                break;
            }
            frame = frames.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(error = %e, "Event stream read error");
                break;
            }
            None => {
                debug!("Event stream closed by peer");
                break;
            }
        };

        trace!(event = %frame.event, data = %frame.data, "Event received");

        match classify(&frame) {
            Dispatch::Handshake(id) => {
                debug!(client_id = %id, "Event stream connected");
                client_id.send_replace(Some(id));
            }
            Dispatch::Event { kind, key } => {
                let event = StreamEvent {
                    kind,
                    key,
                    received_at: Utc::now(),
                };
                if let Err(mpsc::error::TrySendError::Full(event)) = events.try_send(event) {
                    dropped += 1;
                    debug!(
                        kind = %event.kind,
                        key = %event.key,
                        dropped,
                        "Event queue full, dropping event"
                    );
                }
            }
            Dispatch::Skip => {}
        }
    }

    if dropped > 0 {
        warn!(dropped, "Event stream reader dropped events on a full queue");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_classify_handshake() {
        assert_eq!(
            classify(&frame("connected", r#"{"clientId":"abc"}"#)),
            Dispatch::Handshake("abc".into())
        );
        assert_eq!(classify(&frame("connected", "not json")), Dispatch::Skip);
    }

    #[test]
    fn test_classify_event() {
        assert_eq!(
            classify(&frame("card_created", r#"{"card":{"id":"c1"}}"#)),
            Dispatch::Event {
                kind: EventKind::CardCreated,
                key: "c1".into()
            }
        );
    }

    #[test]
    fn test_classify_skips_bad_input() {
        assert_eq!(classify(&frame("card_created", "{oops")), Dispatch::Skip);
        assert_eq!(classify(&frame("card_created", "{}")), Dispatch::Skip);
        assert_eq!(
            classify(&frame("presence", r#"{"cardId":"c1"}"#)),
            Dispatch::Skip
        );
    }

    #[test]
    fn test_classify_skips_empty_primary_key() {
        assert_eq!(
            classify(&frame(
                "card_created",
                r#"{"card":{"id":""},"cardId":"c10"}"#
            )),
            Dispatch::Skip
        );
    }
}
