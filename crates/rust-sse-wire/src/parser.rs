use std::time::Duration;

use bytes::BytesMut;

use crate::error::ParseError;
use crate::event_id::EventId;
use crate::lines::lines;

const BUFFER_CAPACITY: usize = 1024;

/// Upper bound on a single event's buffered bytes unless overridden.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 64 * 1024;

/// A parsed event, as a client observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The stream's last seen event id at dispatch time. Ids persist across
    /// events: an event without an `id` field carries the previous one.
    pub last_event_id: EventId,
    /// The event name; empty means the unnamed (default) event type.
    pub event_type: String,
    /// Data lines joined with LF, with the trailing LF stripped.
    pub data: String,
    /// Reconnection hint, present when the event carried a `retry` field.
    pub retry: Option<Duration>,
}

/// Incremental parser turning a byte stream into [`Event`]s.
///
/// Feed chunks as they arrive with [`Parser::feed`]; each call returns the
/// events whose blank-line terminator was reached. Call [`Parser::finish`]
/// at end of input to dispatch a pending unterminated event (soft EOF).
///
/// Follows the WHATWG parsing model: lines end with LF, CR or CRLF, a field
/// is `name:<optional one space>value`, lines starting with a colon are
/// comments, unknown field names are ignored, and an `id` containing a NUL
/// byte is dropped without touching the stream's last event id.
#[derive(Debug)]
pub struct Parser {
    buffer: BytesMut,
    data: String,
    event_type: String,
    last_event_id: EventId,
    retry: Option<Duration>,
    had_fields: bool,
    event_size: usize,
    max_event_size: usize,
    failed: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::with_max_event_size(DEFAULT_MAX_EVENT_SIZE)
    }

    /// Creates a parser that fails the stream once a single event buffers
    /// more than `limit` bytes.
    pub fn with_max_event_size(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(BUFFER_CAPACITY),
            data: String::new(),
            event_type: String::new(),
            last_event_id: EventId::none(),
            retry: None,
            had_fields: false,
            event_size: 0,
            max_event_size: limit,
            failed: false,
        }
    }

    /// Processes the next chunk of input, returning completed events.
    ///
    /// # Errors
    /// [`ParseError::EventTooLarge`] once the current event exceeds the
    /// configured limit. The error is fatal: every later call fails too.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<Event>, ParseError> {
        if self.failed {
            return Err(ParseError::EventTooLarge {
                limit: self.max_event_size,
            });
        }
        self.buffer.extend_from_slice(input);

        let mut events = Vec::new();
        loop {
            let Some((line_len, term_len)) = self.next_complete_line() else {
                break;
            };
            self.event_size += line_len + term_len;
            if self.event_size > self.max_event_size {
                self.failed = true;
                return Err(ParseError::EventTooLarge {
                    limit: self.max_event_size,
                });
            }
            let line = self.buffer.split_to(line_len + term_len);
            if let Some(event) = self.process_line(&line[..line_len]) {
                events.push(event);
            }
        }

        if self.event_size + self.buffer.len() > self.max_event_size {
            self.failed = true;
            return Err(ParseError::EventTooLarge {
                limit: self.max_event_size,
            });
        }
        Ok(events)
    }

    /// Dispatches the pending event, if any, at end of input.
    ///
    /// Strict consumers that require the blank-line terminator should use
    /// [`Message::from_wire`](crate::Message::from_wire) instead.
    pub fn finish(&mut self) -> Option<Event> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            let mut flushed = None;
            for (line, _) in lines(&rest) {
                if let Some(event) = self.process_line(line) {
                    flushed = Some(event);
                }
            }
            if flushed.is_some() {
                return flushed;
            }
        }
        self.process_line(b"")
    }

    /// Scans for the next complete line, holding back a trailing CR that
    /// may turn out to be the first half of a CRLF.
    fn next_complete_line(&self) -> Option<(usize, usize)> {
        for (i, &b) in self.buffer.iter().enumerate() {
            match b {
                b'\n' => return Some((i, 1)),
                b'\r' => {
                    if i + 1 == self.buffer.len() {
                        return None;
                    }
                    let term_len = if self.buffer[i + 1] == b'\n' { 2 } else { 1 };
                    return Some((i, term_len));
                }
                _ => {}
            }
        }
        None
    }

    fn process_line(&mut self, line: &[u8]) -> Option<Event> {
        if line.is_empty() {
            // the event block ended either way, so the size counter resets
            self.event_size = 0;
            if !self.had_fields {
                return None;
            }
            let mut data = std::mem::take(&mut self.data);
            if data.ends_with('\n') {
                data.pop();
            }
            self.had_fields = false;
            return Some(Event {
                last_event_id: self.last_event_id.clone(),
                event_type: std::mem::take(&mut self.event_type),
                data,
                retry: self.retry.take(),
            });
        }
        if line[0] == b':' {
            return None;
        }
        let (name, value) = split_field(line);
        match name {
            b"data" => {
                self.had_fields = true;
                self.data.push_str(&String::from_utf8_lossy(value));
                self.data.push('\n');
            }
            b"event" => {
                self.had_fields = true;
                self.event_type = String::from_utf8_lossy(value).into_owned();
            }
            b"id" => {
                if !value.contains(&0) {
                    self.had_fields = true;
                    self.last_event_id =
                        EventId::from_line(String::from_utf8_lossy(value).into_owned());
                }
            }
            b"retry" => {
                if !value.is_empty() && value.iter().all(u8::is_ascii_digit) {
                    if let Some(millis) = std::str::from_utf8(value)
                        .ok()
                        .and_then(|v| v.parse::<u64>().ok())
                    {
                        self.had_fields = true;
                        self.retry = Some(Duration::from_millis(millis));
                    }
                }
            }
            _ => {}
        }
        None
    }
}

/// Splits a field line into its name and value, stripping the single
/// optional space after the colon. A line without a colon is a field with
/// an empty value.
pub(crate) fn split_field(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b':') {
        Some(i) => {
            let value = &line[i + 1..];
            (&line[..i], value.strip_prefix(b" ").unwrap_or(value))
        }
        None => (line, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut Parser, input: &str) -> Vec<Event> {
        parser.feed(input.as_bytes()).unwrap()
    }

    #[test]
    fn parses_a_full_event() {
        let mut parser = Parser::new();
        let events = feed_all(
            &mut parser,
            "data:hello\ndata:world\nid:7\nevent:greet\nretry:1500\n\n",
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].last_event_id, EventId::must("7"));
        assert_eq!(events[0].event_type, "greet");
        assert_eq!(events[0].data, "hello\nworld");
        assert_eq!(events[0].retry, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn strips_one_optional_space_after_the_colon() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "data: hello\ndata:  indented\n\n");
        assert_eq!(events[0].data, "hello\n indented");
    }

    #[test]
    fn handles_cr_and_crlf_line_endings() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "data:a\r\ndata:b\rdata:c\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb\nc");
    }

    #[test]
    fn holds_back_a_crlf_split_across_chunks() {
        let mut parser = Parser::new();
        assert!(parser.feed(b"data:a\r").unwrap().is_empty());
        let events = parser.feed(b"\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a");
    }

    #[test]
    fn last_event_id_persists_across_events() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "id:3\ndata:first\n\ndata:second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].last_event_id, EventId::must("3"));
        assert_eq!(events[1].last_event_id, EventId::must("3"));
    }

    #[test]
    fn ignores_ids_containing_nul() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "id:a\0b\ndata:x\n\n");
        assert_eq!(events[0].last_event_id, EventId::none());
    }

    #[test]
    fn ignores_non_numeric_retry() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "retry:12a\ndata:x\n\n");
        assert_eq!(events[0].retry, None);
    }

    #[test]
    fn comments_and_unknown_fields_do_not_dispatch() {
        let mut parser = Parser::new();
        assert!(feed_all(&mut parser, ":comment\nfoo:bar\n\n").is_empty());
    }

    #[test]
    fn blank_lines_without_fields_produce_nothing() {
        let mut parser = Parser::new();
        assert!(feed_all(&mut parser, "\n\n\n").is_empty());
    }

    #[test]
    fn dispatches_field_only_events() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "id:9\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].last_event_id, EventId::must("9"));
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "data:first\n\ndata:second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn partial_lines_span_chunks() {
        let mut parser = Parser::new();
        assert!(parser.feed(b"data:hel").unwrap().is_empty());
        let events = parser.feed(b"lo\n\n").unwrap();
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn finish_dispatches_the_pending_event() {
        let mut parser = Parser::new();
        assert!(parser.feed(b"data:pending").unwrap().is_empty());
        let event = parser.finish().expect("soft EOF dispatches");
        assert_eq!(event.data, "pending");
        assert!(parser.finish().is_none());
    }

    #[test]
    fn finish_without_fields_is_none() {
        let mut parser = Parser::new();
        assert!(parser.finish().is_none());
    }

    #[test]
    fn oversized_events_fail_the_stream() {
        let mut parser = Parser::with_max_event_size(16);
        let err = parser.feed(&[b'a'; 32]).unwrap_err();
        assert_eq!(err, ParseError::EventTooLarge { limit: 16 });
        // the failure is sticky
        assert!(parser.feed(b"data:x\n\n").is_err());
    }

    #[test]
    fn utf8_values_survive() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "data:héllo wörld ✓\n\n");
        assert_eq!(events[0].data, "héllo wörld ✓");
    }
}
