//! Incremental decoder for `text/event-stream` bodies.
//!
//! Only the `data` field matters here; `event`, `id` and `retry` lines are
//! accepted and ignored, and `:` comment lines (keep-alives) are skipped.

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of the body and returns the data of every event the
    /// chunk completed, in order. Partial lines and events are kept for the
    /// next call, so chunk boundaries may fall anywhere, including inside a
    /// multi-byte character.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: {\"a\":1}\n\n"), vec![r#"{"a":1}"#]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"bio\":").is_empty());
        assert!(decoder.push(b"\"hi\"}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), vec![r#"{"bio":"hi"}"#]);
    }

    #[test]
    fn test_multibyte_character_split() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: \"caf\u{e9}\"\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["\"caf\u{e9}\""]);
    }

    #[test]
    fn test_comments_and_other_fields_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b":\n\nevent: message\nid: 7\ndata: null\n\n");
        assert_eq!(events, vec!["null"]);
    }

    #[test]
    fn test_crlf_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: one\r\ndata: two\r\n\r\ndata: three\n\n");
        assert_eq!(events, vec!["one\ntwo", "three"]);
    }
}
