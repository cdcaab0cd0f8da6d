use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InvalidEventId;

/// An SSE event identifier.
///
/// Wraps an optional string that is guaranteed to contain no CR or LF
/// characters. An unset id and an id set to the empty string are distinct
/// protocol states: the writer omits the `id` field entirely for the former
/// and emits `id:\n` for the latter, and a reconnecting client may legally
/// report either.
///
/// The unset state round-trips to `null` in structured formats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventId(Option<String>);

impl EventId {
    /// Creates a set id from the given string.
    ///
    /// # Errors
    /// Returns [`InvalidEventId`] if the string contains a CR or LF
    /// character, which the wire format cannot represent.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidEventId> {
        let id = id.into();
        if id.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(InvalidEventId);
        }
        Ok(Self(Some(id)))
    }

    /// Like [`EventId::new`], but panics if the string contains a CR or LF.
    ///
    /// Intended for ids known valid at compile time.
    pub fn must(id: impl Into<String>) -> Self {
        match Self::new(id) {
            Ok(id) => id,
            Err(err) => panic!("{err}"),
        }
    }

    /// The unset id.
    pub const fn none() -> Self {
        Self(None)
    }

    /// Wraps a value that is already known to be a single line.
    pub(crate) fn from_line(line: String) -> Self {
        Self(Some(line))
    }

    /// Whether the id is set. A set empty string still counts as set.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// The id's value, or `None` when unset.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or_default())
    }
}

impl TryFrom<&str> for EventId {
    type Error = InvalidEventId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(id) => serializer.serialize_str(id),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(id) => Self::new(id).map_err(serde::de::Error::custom),
            None => Ok(Self::none()),
        }
    }
}
