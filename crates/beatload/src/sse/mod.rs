//! Server-push event stream handling: line decoding, key extraction and the
//! per-actor reader task.

pub mod codec;
pub mod keys;
pub mod reader;

pub use codec::{SseCodec, SseFrame};
pub use reader::{ByteStream, Dispatch, ReaderState, SseReader, StreamEvent};
