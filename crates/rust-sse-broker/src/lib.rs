//! Single-loop pub/sub broker for Server-Sent Events.
//!
//! The [`Broker`] multiplexes published [`Message`]s to per-connection
//! subscribers across named topics. Delivery to each subscriber is
//! synchronous, so a slow consumer backpressures publishers instead of
//! growing unbounded queues; callers that want isolation pick a buffered
//! subscriber channel instead.
//!
//! A [`ReplayProvider`] hooks into the publish path and resends the events a
//! reconnecting subscriber missed, keyed by its last seen event id. Two
//! policies ship with the crate: [`FiniteReplayProvider`] (bounded FIFO) and
//! [`ValidReplayProvider`] (TTL-bounded, garbage collected).
//!
//! With the `axum` feature (on by default), [`SseServer`] upgrades HTTP
//! requests into SSE streams fed from the broker.

mod broker;
mod error;
mod replay;
#[cfg(feature = "axum")]
mod sse_server;
mod subscription;

pub use broker::*;
pub use error::*;
pub use replay::*;
#[cfg(feature = "axum")]
pub use sse_server::*;
pub use subscription::*;

// The wire-level types a broker user needs are re-exported so most callers
// depend on this crate alone.
pub use rust_sse_wire::{EventId, InvalidEventId, Message};
pub use tokio_util::sync::CancellationToken;
