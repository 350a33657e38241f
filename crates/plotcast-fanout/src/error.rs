//! Error types for the fanout layer.

/// A single connection could not accept a frame.
///
/// The manager isolates these per connection: the failing connection is
/// purged and the fanout carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,

    /// The connection's outbound buffer is full.
    #[error("connection outbound buffer full")]
    Full,

    /// The transport rejected the write.
    #[error("write failed: {0}")]
    Write(String),
}

/// Errors returned by [`FanoutHandle`](crate::FanoutHandle).
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// The manager task has stopped and no longer accepts commands.
    #[error("fanout manager is not running")]
    Closed,

    /// The manager task panicked or was aborted.
    #[error("fanout manager task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
