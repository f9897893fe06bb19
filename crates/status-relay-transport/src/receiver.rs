//! Client-side re-assembly of status frames.
//!
//! A status message may arrive split over several transport frames. Frames
//! are appended to a buffer until it holds complete JSON documents; each
//! complete `status` document produces one [`StatusUpdate`]. Other message
//! types are ignored. A syntax error discards the whole buffer so the
//! receiver resynchronises on the next frame.

use bytes::BytesMut;
use serde_json::Value;

use crate::ServerMessage;

/// Default cap on buffered, incomplete input (1 MiB).
pub const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// One display update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub text: String,
}

/// Accumulates frames and extracts status updates.
#[derive(Debug)]
pub struct StatusReceiver {
    buffer: BytesMut,
    max_buffered: usize,
}

impl Default for StatusReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReceiver {
    /// Create a receiver with the default buffer cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_buffered(MAX_BUFFERED_BYTES)
    }

    /// Create a receiver that resynchronises once `max_buffered` bytes of
    /// incomplete input pile up.
    #[must_use]
    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    /// Bytes currently held waiting for the rest of a document.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append one frame and return the updates it completed.
    pub fn push_frame(&mut self, frame: &[u8]) -> Vec<StatusUpdate> {
        self.buffer.extend_from_slice(frame);

        let mut updates = Vec::new();
        let mut consumed = 0;
        let mut resync = false;
        {
            let mut documents = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            loop {
                match documents.next() {
                    Some(Ok(value)) => {
                        consumed = documents.byte_offset();
                        updates.extend(Self::to_update(value));
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        tracing::warn!("Discarding malformed status frame: {e}");
                        resync = true;
                        break;
                    }
                    None => {
                        consumed = documents.byte_offset();
                        break;
                    }
                }
            }
        }

        if resync {
            self.buffer.clear();
        } else {
            let _ = self.buffer.split_to(consumed);
        }

        if self.buffer.len() > self.max_buffered {
            tracing::warn!(buffered = self.buffer.len(), "Status buffer overflow, resynchronising");
            self.buffer.clear();
        }

        updates
    }

    /// Drop anything buffered, e.g. after the connection was lost.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn to_update(value: Value) -> Option<StatusUpdate> {
        match serde_json::from_value::<ServerMessage>(value) {
            Ok(ServerMessage::Status { data }) => Some(StatusUpdate { text: data }),
            Ok(other) => {
                tracing::debug!(?other, "Ignoring non-status message");
                None
            }
            Err(e) => {
                tracing::debug!("Ignoring unrecognised message: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &[u8] = br#"{"type":"status","data":"hello"}"#;

    fn texts(updates: Vec<StatusUpdate>) -> Vec<String> {
        updates.into_iter().map(|u| u.text).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut receiver = StatusReceiver::new();
        assert_eq!(texts(receiver.push_frame(HELLO)), vec!["hello"]);
        assert_eq!(receiver.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_position() {
        for split in 1..HELLO.len() {
            let mut receiver = StatusReceiver::new();
            let (head, tail) = HELLO.split_at(split);

            let first = receiver.push_frame(head);
            assert!(first.is_empty(), "premature update at split {split}");
            assert_eq!(texts(receiver.push_frame(tail)), vec!["hello"], "split {split}");
            assert_eq!(receiver.buffered(), 0);
        }
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let frame = r#"{"type":"status","data":"héllo ✓"}"#.as_bytes();
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut receiver = StatusReceiver::new();
        assert!(receiver.push_frame(&frame[..split]).is_empty());
        assert_eq!(texts(receiver.push_frame(&frame[split..])), vec!["héllo ✓"]);
    }

    #[test]
    fn test_other_type_ignored() {
        let mut receiver = StatusReceiver::new();
        assert!(receiver.push_frame(br#"{"type":"other","data":"x"}"#).is_empty());
        assert!(receiver.push_frame(br#"{"type":"pong"}"#).is_empty());
        assert_eq!(receiver.buffered(), 0);
    }

    #[test]
    fn test_non_object_ignored() {
        let mut receiver = StatusReceiver::new();
        assert!(receiver.push_frame(br#""status""#).is_empty());
        assert!(receiver.push_frame(br#"{"data":"hello"}"#).is_empty());
        assert_eq!(texts(receiver.push_frame(HELLO)), vec!["hello"]);
    }

    #[test]
    fn test_malformed_input_resynchronises() {
        let mut receiver = StatusReceiver::new();
        assert!(receiver.push_frame(br#"{"type":"status",,"#).is_empty());
        assert_eq!(receiver.buffered(), 0);
        assert_eq!(texts(receiver.push_frame(HELLO)), vec!["hello"]);
    }

    #[test]
    fn test_consecutive_documents_in_one_frame() {
        let mut receiver = StatusReceiver::new();
        let frame = br#"{"type":"status","data":"a"} {"type":"status","data":"b"}"#;
        assert_eq!(texts(receiver.push_frame(frame)), vec!["a", "b"]);
    }

    #[test]
    fn test_overflow_resynchronises() {
        let mut receiver = StatusReceiver::with_max_buffered(16);
        assert!(receiver.push_frame(br#"{"type":"status","data":"way too long"#).is_empty());
        assert_eq!(receiver.buffered(), 0);
        assert_eq!(texts(receiver.push_frame(HELLO)), vec!["hello"]);
    }

    #[test]
    fn test_reset_clears_partial_document() {
        let mut receiver = StatusReceiver::new();
        assert!(receiver.push_frame(&HELLO[..10]).is_empty());
        receiver.reset();
        assert_eq!(texts(receiver.push_frame(HELLO)), vec!["hello"]);
    }
}
