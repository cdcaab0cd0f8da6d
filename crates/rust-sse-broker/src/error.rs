use thiserror::Error;

pub type BrokerResult<T> = core::result::Result<T, BrokerError>;

/// Errors returned by [`Broker`](crate::Broker) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker was stopped. Every publish, subscribe or stop call after
    /// [`Broker::stop`](crate::Broker::stop) returns this sentinel.
    #[error("provider is closed")]
    Closed,
}

/// Errors raised when a replay buffer cannot resolve a last seen event id.
///
/// The broker swallows these (a failed lookup skips replay and the
/// subscriber joins live delivery); they surface only when a
/// [`ReplayProvider`](crate::ReplayProvider) is driven directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// The id is well-formed but no buffered entry follows it.
    #[error("no buffered event found for ID {0:?}")]
    NotFound(String),

    /// The id cannot be understood by the buffer, e.g. a non-numeric id
    /// handed to an auto-id buffer.
    #[error("invalid event ID {0:?}")]
    InvalidId(String),
}
