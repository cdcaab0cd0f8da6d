use thiserror::Error;

/// Error returned when constructing an [`EventId`](crate::EventId) from a
/// string that contains a CR or LF character.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event ID must not contain CR or LF")]
pub struct InvalidEventId;

/// Error returned by the strict single-event unmarshaller,
/// [`Message::from_wire`](crate::Message::from_wire).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnmarshalError {
    /// The input ended before the event's blank-line terminator.
    #[error("unexpected end of input before the event terminator")]
    UnexpectedEof,

    /// A field carried a value the protocol does not allow.
    #[error("invalid value {value:?} for field {field:?}: {reason}")]
    InvalidField {
        field: String,
        value: String,
        reason: String,
    },
}

/// Fatal error raised by the incremental [`Parser`](crate::Parser).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A single event exceeded the configured buffering limit.
    #[error("event exceeds the maximum size of {limit} bytes")]
    EventTooLarge { limit: usize },
}

/// Error yielded by [`EventStream`](crate::EventStream): either the
/// underlying transport failed or the byte stream is not valid SSE.
#[cfg(feature = "stream")]
#[derive(Debug, Error)]
pub enum DecodeError<E> {
    #[error("transport error: {0}")]
    Transport(E),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
