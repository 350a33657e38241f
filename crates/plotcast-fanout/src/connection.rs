//! Live client connection handles.
//!
//! The manager owns one [`Connection`] per registered client and writes
//! delivery frames through it. Writes never block: a handle either
//! accepts the frame or reports a [`DeliveryError`].

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;

/// Something the manager can deliver `"<topic>:<message>"` frames to.
pub trait Connection: Send {
    /// Hand one text frame to the client without blocking.
    fn deliver(&self, frame: &str) -> Result<(), DeliveryError>;
}

/// A connection backed by a bounded channel to the client's writer task.
///
/// Dropping the handle closes the channel, which tells the writer task to
/// close the socket.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    tx: mpsc::Sender<String>,
}

impl ChannelConnection {
    /// Wrap an existing sender.
    pub const fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Create a handle together with the receiver its writer task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

impl Connection for ChannelConnection {
    fn deliver(&self, frame: &str) -> Result<(), DeliveryError> {
        self.tx.try_send(frame.to_owned()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
