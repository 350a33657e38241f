//! Error types for the bus.

use std::net::SocketAddr;

/// Errors raised by the bus transport and its endpoints.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Socket I/O failed.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A message announced zero frames or more than the limit.
    #[error("invalid frame count {0}")]
    FrameCount(u32),

    /// A frame exceeds the size limit.
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// An event could not be serialized.
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The endpoint is already running.
    #[error("already running on {0}")]
    AlreadyRunning(SocketAddr),
}
