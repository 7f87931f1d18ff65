//! Server-sent event framing for streamed runs.
//!
//! Network chunks do not line up with event boundaries: one chunk may hold
//! several events and one event may span chunks. The decoder buffers partial
//! lines as raw bytes, so a UTF-8 sequence cut by a chunk boundary is only
//! decoded once its line is complete, and emits an event on every blank line.

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            if let Some(message) = self.process_line(line.trim_end_matches('\r')) {
                messages.push(message);
            }
        }
        messages
    }

    /// Dispatch whatever is pending once the byte stream ended.
    pub fn flush(&mut self) -> Option<SseMessage> {
        let remaining = std::mem::take(&mut self.buffer);
        let remaining = String::from_utf8_lossy(&remaining);
        if !remaining.trim().is_empty() {
            self.process_line(remaining.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry are not used by the assistants stream
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let message = SseMessage {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.feed(b"event: thread.run.created\ndata: {\"id\":\"run_1\"}\n\n");
        assert_eq!(
            messages,
            vec![SseMessage {
                event: Some("thread.run.created".to_string()),
                data: "{\"id\":\"run_1\"}".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: thread.message.delta\nda").is_empty());
        assert!(decoder.feed(b"ta: {\"a\":").is_empty());
        let messages = decoder.feed(b"1}\r\n\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_codepoint_split_across_chunks() {
        let payload = "data: {\"v\":\"héllo\"}\n\n".as_bytes();
        let cut = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&payload[..cut]).is_empty());
        let messages = decoder.feed(&payload[cut..]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "{\"v\":\"héllo\"}");
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.feed(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n: keepalive\n\n");
        let events: Vec<_> = messages.iter().map(|m| m.event.clone().unwrap()).collect();
        assert_eq!(events, vec!["a", "b"]);
    }

    #[test]
    fn test_multiline_data() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.feed(b"data: first\ndata: second\n\n");
        assert_eq!(messages[0].data, "first\nsecond");
        assert!(messages[0].event.is_none());
    }

    #[test]
    fn test_flush_dispatches_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: done\ndata: [DONE]").is_empty());
        let message = decoder.flush().unwrap();
        assert_eq!(message.event.as_deref(), Some("done"));
        assert_eq!(message.data, "[DONE]");
        assert!(decoder.flush().is_none());
    }
}
