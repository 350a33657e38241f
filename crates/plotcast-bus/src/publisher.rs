//! The publishing side of the bus.
//!
//! [`Publisher::publish`] never blocks: it serializes a [`BroadcastEvent`]
//! and queues it for a writer task that keeps one connection to the
//! forwarder input. If the queue is full, or the forwarder cannot be
//! reached, the event is dropped.

use std::collections::BTreeSet;
use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use plotcast_types::{BroadcastEvent, ConnectionId, Topic};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::transport::write_message;

/// Events queued before `publish` starts dropping.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Shortest time a connection attempt is given, however small the
/// reconnect delay.
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends broadcast events to a forwarder.
pub struct Publisher {
    tx: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Start a writer task for the forwarder input at `addr`.
    ///
    /// The connection is made on the first publish, and again after any
    /// failure once `reconnect_delay` has passed. A connection attempt is
    /// abandoned after `reconnect_delay` (at least one second), so `stop`
    /// never waits on an unresponsive address for longer than that.
    pub fn start(addr: impl Into<String>, capacity: usize, reconnect_delay: Duration) -> Self {
        let addr = addr.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        info!(addr = addr, "publisher started");
        let task = tokio::spawn(write_loop(addr, rx, shutdown_rx, reconnect_delay));
        Self {
            tx,
            shutdown,
            task: Some(task),
        }
    }

    /// Queue `message` for every subscriber of `topic` not in `exclude`.
    ///
    /// Returns whether the event was queued.
    pub fn publish(
        &self,
        topic: impl Into<Topic>,
        message: impl Into<String>,
        exclude: BTreeSet<ConnectionId>,
    ) -> Result<bool, BusError> {
        let event = BroadcastEvent::new(topic, message).with_exclude(exclude);
        self.publish_event(&event)
    }

    /// Queue an already built event.
    pub fn publish_event(&self, event: &BroadcastEvent) -> Result<bool, BusError> {
        let payload = Bytes::from(event.to_bytes()?);
        match self.tx.try_send(payload) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(topic = %event.topic, error = %e, "publish dropped");
                Ok(false)
            }
        }
    }

    /// Write out whatever is queued, close the connection and wait for the
    /// writer task. Calling it again does nothing.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            warn!(error = %e, "publisher task ended abnormally");
        }
        info!("publisher stopped");
    }

    /// Whether the writer task is running.
    pub const fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("running", &self.is_running())
            .field("queued", &self.tx.max_capacity().saturating_sub(self.tx.capacity()))
            .finish()
    }
}

async fn write_loop(
    addr: String,
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    let mut stream: Option<TcpStream> = None;
    let mut retry_at: Option<Instant> = None;
    let mut closing = false;
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed(), if !closing => {
                closing = true;
                rx.close();
                continue;
            }
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        if stream.is_none() {
            if retry_at.is_some_and(|at| Instant::now() < at) {
                debug!(addr = addr, "forwarder unreachable, event dropped");
                continue;
            }
            let limit = reconnect_delay.max(MIN_CONNECT_TIMEOUT);
            match within(limit, TcpStream::connect(&addr)).await {
                Ok(connected) => {
                    info!(addr = addr, "publisher connected to forwarder");
                    stream = Some(connected);
                    retry_at = None;
                }
                Err(e) => {
                    warn!(addr = addr, error = %e, "publisher connect failed, event dropped");
                    retry_at = Instant::now().checked_add(reconnect_delay);
                    continue;
                }
            }
        }

        let Some(connected) = stream.as_mut() else {
            continue;
        };
        if let Err(e) = write_message(connected, &[payload]).await {
            warn!(addr = addr, error = %e, "publish write failed, event dropped");
            stream = None;
        }
    }
    debug!(addr = addr, "publisher writer exiting");
}

/// Run an I/O `attempt`, failing with [`io::ErrorKind::TimedOut`] after
/// `limit`.
async fn within<T, F>(limit: Duration, attempt: F) -> io::Result<T>
where
    T: Send,
    F: Future<Output = io::Result<T>> + Send,
{
    timeout(limit, attempt).await.unwrap_or_else(|_elapsed| {
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no answer within {limit:?}"),
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stalled_attempt_times_out() {
        let stalled = std::future::pending::<io::Result<()>>();
        let err = within(Duration::from_millis(20), stalled).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn finished_attempt_passes_through() {
        let value = within(Duration::from_secs(1), async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn stop_with_unreachable_forwarder_is_bounded() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let mut publisher = Publisher::start(addr.to_string(), 4, Duration::from_millis(20));
        assert!(publisher.publish("T", "dropped", BTreeSet::new()).unwrap());
        timeout(Duration::from_secs(3), publisher.stop()).await.unwrap();
        assert!(!publisher.is_running());
    }
}
