//! Incremental decoder for the line-oriented event stream.
//!
//! ```text
//! event: <type>
//! data: <json fragment>
//! data: <json fragment>
//!
//! ```
//!
//! A blank line dispatches the accumulated block. Multiple `data:` lines are
//! joined with `\n`; other fields (`id:`, `retry:`, comments) are ignored.
//! Lines may end in LF or CRLF and are trimmed before parsing.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Type used for blocks without an `event:` line.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One dispatched block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Stateful decoder; partial lines and blocks survive across chunks.
#[derive(Debug, Default)]
pub struct SseCodec {
    event: Option<String>,
    data: String,
    /// Bytes of `src` already scanned for a newline.
    scanned: usize,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one trimmed line; returns a frame when the line dispatches one.
    fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            return Some(SseFrame {
                event: event.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
                data: std::mem::take(&mut self.data),
            });
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(value.trim());
        }
        None
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.push_line(line.trim()) {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A block without its terminating blank line is never dispatched.
        let frame = self.decode(buf)?;
        if frame.is_none() {
            buf.clear();
            self.scanned = 0;
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut SseCodec, input: &str) -> Vec<SseFrame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_typed_block() {
        let mut codec = SseCodec::new();
        let frames = decode_all(
            &mut codec,
            "event: connected\ndata: {\"clientId\":\"abc\"}\n\n",
        );
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "connected".into(),
                data: "{\"clientId\":\"abc\"}".into(),
            }]
        );
    }

    #[test]
    fn test_default_type_and_crlf() {
        let mut codec = SseCodec::new();
        let frames = decode_all(&mut codec, "data: {\"a\":1}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, DEFAULT_EVENT_TYPE);
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut codec = SseCodec::new();
        let frames = decode_all(&mut codec, "event: x\ndata: one\ndata: two\n\n");
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn test_ignored_fields_and_empty_blocks() {
        let mut codec = SseCodec::new();
        let frames = decode_all(
            &mut codec,
            ": keep-alive\nid: 7\nretry: 1000\n\nevent: orphan\n\ndata: payload\n\n",
        );
        // The `event:` of a block without data does not leak into the next one.
        assert_eq!(
            frames,
            vec![SseFrame {
                event: DEFAULT_EVENT_TYPE.into(),
                data: "payload".into(),
            }]
        );
    }

    #[test]
    fn test_split_across_chunks() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from("event: card_cre");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ated\ndata: {\"card\":");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"{\"id\":\"c1\"}}\n");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.event, "card_created");
        assert_eq!(frame.data, "{\"card\":{\"id\":\"c1\"}}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_block_dropped_at_eof() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from("event: x\ndata: partial");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
