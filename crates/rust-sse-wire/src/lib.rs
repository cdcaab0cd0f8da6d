//! Event model and wire codec for the HTML5 Server-Sent Events protocol.
//!
//! This crate provides the pieces shared by SSE producers and consumers:
//!
//! - [`Message`], the in-memory representation of a single event (multi-line
//!   data, comments, event name, id, retry hint, expiry, topic) together with
//!   its streaming wire writer.
//! - [`EventId`], a validated id value type where "unset" and "set to the
//!   empty string" are distinct protocol states.
//! - [`Parser`], an incremental parser that turns a byte stream back into
//!   discrete [`Event`]s following the WHATWG parsing rules.
//! - [`EventStream`], an adapter from a stream of byte chunks (an HTTP
//!   response body, for instance) to a stream of parsed events.

mod error;
mod event_id;
mod lines;
mod message;
mod parser;
#[cfg(feature = "stream")]
mod stream;

pub use error::*;
pub use event_id::*;
pub use message::*;
pub use parser::*;
#[cfg(feature = "stream")]
pub use stream::*;
