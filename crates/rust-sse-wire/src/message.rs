use core::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::UnmarshalError;
use crate::event_id::EventId;
use crate::lines::{lines, Terminator};
use crate::parser::split_field;

/// A single line of a message: either a `data` field or a comment.
///
/// The content never contains an interior line terminator; the terminator
/// the caller supplied (if any) is kept so the writer can reproduce it.
#[derive(Debug, Clone)]
struct Chunk {
    content: Bytes,
    terminator: Option<Terminator>,
    comment: bool,
}

/// A single server-sent event, the unit handed to the broker for publishing.
///
/// A message carries an ordered sequence of data and comment lines, an
/// optional event name, an optional [`EventId`], an optional reconnection
/// hint, an optional expiry consumed by replay buffers (never transmitted)
/// and the topic it is published on. The empty topic is the default topic.
///
/// Messages are built by the publisher and must not be mutated once handed
/// to a broker; replay buffers in auto-id mode clone before assigning ids.
#[derive(Debug, Clone, Default)]
pub struct Message {
    chunks: Vec<Chunk>,
    name: String,
    id: EventId,
    retry: Option<Duration>,
    expires_at: Option<Instant>,
    topic: String,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes as data lines.
    ///
    /// The input is split at LF, CR and CRLF boundaries; each line becomes
    /// one chunk and keeps its original terminator style. A line without a
    /// trailing terminator is compensated with an LF when written.
    pub fn append_data(&mut self, data: impl AsRef<[u8]>) {
        for (line, terminator) in lines(data.as_ref()) {
            self.chunks.push(Chunk {
                content: Bytes::copy_from_slice(line),
                terminator,
                comment: false,
            });
        }
    }

    /// Appends a string as data lines. See [`Message::append_data`].
    pub fn append_text(&mut self, text: impl AsRef<str>) {
        self.append_data(text.as_ref().as_bytes());
    }

    /// Appends a comment. Multi-line comments become one `:` line each.
    pub fn comment(&mut self, comment: impl AsRef<str>) {
        for (line, terminator) in lines(comment.as_ref().as_bytes()) {
            self.chunks.push(Chunk {
                content: Bytes::copy_from_slice(line),
                terminator,
                comment: true,
            });
        }
    }

    /// Sets the event name, replacing any previous one.
    ///
    /// Returns `false` (leaving the name unchanged) if the value spans more
    /// than one line, which the `event` field cannot carry.
    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.bytes().any(|b| b == b'\r' || b == b'\n') {
            return false;
        }
        self.name = name;
        true
    }

    /// Sets the event id. An unset id clears a previously set one.
    pub fn set_id(&mut self, id: EventId) {
        self.id = id;
    }

    /// Sets the reconnection hint, stored as whole milliseconds.
    pub fn set_retry(&mut self, retry: Duration) {
        self.retry = Some(retry);
    }

    /// Sets the absolute expiry consumed by TTL-aware replay buffers.
    pub fn set_expires_at(&mut self, at: Instant) {
        self.expires_at = Some(at);
    }

    /// Sets the expiry relative to now. See [`Message::set_expires_at`].
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.set_expires_at(Instant::now() + ttl);
    }

    /// Sets the topic the message is published on.
    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = topic.into();
    }

    pub fn with_text(mut self, text: impl AsRef<str>) -> Self {
        self.append_text(text);
        self
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.set_id(id);
        self
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.set_retry(retry);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.set_ttl(ttl);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.set_topic(topic);
        self
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// The topic the message is published on; empty is the default topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Writes the message in wire format, returning the number of bytes
    /// written or the first error the sink reported.
    ///
    /// The output is streamed field by field without buffering the whole
    /// message. Field order is fixed: data and comment lines in insertion
    /// order, then `id` (only when set, including the set-empty id), then
    /// `event` (only when the name is non-empty), then `retry`, then the
    /// blank-line terminator. Empty data chunks are elided.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> io::Result<u64> {
        let mut out = FieldWriter::new(sink);
        for chunk in &self.chunks {
            if !chunk.comment && chunk.content.is_empty() {
                continue;
            }
            out.write(if chunk.comment { b":" } else { b"data:" });
            out.write(&chunk.content);
            out.write(chunk.terminator.map_or(b"\n" as &[u8], Terminator::as_bytes));
        }
        if let Some(id) = self.id.as_str() {
            out.write(b"id:");
            out.write(id.as_bytes());
            out.write(b"\n");
        }
        if !self.name.is_empty() {
            out.write(b"event:");
            out.write(self.name.as_bytes());
            out.write(b"\n");
        }
        if let Some(retry) = self.retry {
            out.write(b"retry:");
            out.write(retry.as_millis().to_string().as_bytes());
            out.write(b"\n");
        }
        out.write(b"\n");
        out.finish()
    }

    /// The message's wire representation as a single buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(64);
        self.write_to(&mut buf)
            .expect("writing to a Vec is infallible");
        Bytes::from(buf)
    }

    /// Strictly parses the wire form of a single event.
    ///
    /// Unlike the incremental [`Parser`](crate::Parser), which skips fields
    /// it cannot use, this fails on an invalid `retry` value and requires
    /// the event to be terminated by a blank line. Comment lines are
    /// consumed but not retained.
    ///
    /// # Errors
    /// [`UnmarshalError::UnexpectedEof`] when the input ends before the
    /// blank-line terminator, [`UnmarshalError::InvalidField`] when a field
    /// value is rejected.
    pub fn from_wire(input: impl AsRef<[u8]>) -> Result<Self, UnmarshalError> {
        let mut msg = Message::new();
        let mut saw_field = false;
        for (line, terminator) in lines(input.as_ref()) {
            if terminator.is_none() {
                break;
            }
            if line.is_empty() {
                if saw_field {
                    return Ok(msg);
                }
                continue;
            }
            if line[0] == b':' {
                continue;
            }
            let (name, value) = split_field(line);
            match name {
                b"data" => {
                    msg.chunks.push(Chunk {
                        content: Bytes::copy_from_slice(value),
                        terminator: Some(Terminator::Lf),
                        comment: false,
                    });
                    saw_field = true;
                }
                b"event" => {
                    msg.name = String::from_utf8_lossy(value).into_owned();
                    saw_field = true;
                }
                b"id" => {
                    if !value.contains(&0) {
                        msg.id = EventId::from_line(String::from_utf8_lossy(value).into_owned());
                        saw_field = true;
                    }
                }
                b"retry" => {
                    let text = String::from_utf8_lossy(value);
                    let reason = if text.is_empty() {
                        Some("empty value".to_string())
                    } else {
                        text.chars()
                            .find(|c| !c.is_ascii_digit())
                            .map(|c| format!("{c:?} is not a digit"))
                    };
                    if let Some(reason) = reason {
                        return Err(UnmarshalError::InvalidField {
                            field: "retry".to_string(),
                            value: text.into_owned(),
                            reason,
                        });
                    }
                    let millis: u64 =
                        text.parse().map_err(|_| UnmarshalError::InvalidField {
                            field: "retry".to_string(),
                            value: text.to_string(),
                            reason: "out of range".to_string(),
                        })?;
                    msg.retry = Some(Duration::from_millis(millis));
                    saw_field = true;
                }
                _ => {}
            }
        }
        Err(UnmarshalError::UnexpectedEof)
    }

    /// Concatenated data lines, LF-joined, as a reader would observe them.
    pub fn data(&self) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            if chunk.comment || chunk.content.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&String::from_utf8_lossy(&chunk.content));
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// Byte-counting writer with a sticky error: once the sink fails, later
/// writes are no-ops and `finish` reports the first failure.
struct FieldWriter<'a, W: Write> {
    sink: &'a mut W,
    written: u64,
    error: Option<io::Error>,
}

impl<'a, W: Write> FieldWriter<'a, W> {
    fn new(sink: &'a mut W) -> Self {
        Self {
            sink,
            written: 0,
            error: None,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.error.is_some() {
            return;
        }
        match self.sink.write_all(bytes) {
            Ok(()) => self.written += bytes.len() as u64,
            Err(err) => self.error = Some(err),
        }
    }

    fn finish(self) -> io::Result<u64> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }
}
