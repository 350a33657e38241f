//! The bus subscriber.
//!
//! Connects to one or more forwarder output addresses, decodes each
//! message as a [`BroadcastEvent`] and hands it to the fanout. Peers that
//! are down or drop are retried after a fixed delay.
//!
//! A message may carry a routing prefix ahead of an empty separator frame;
//! only the payload after it is decoded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use plotcast_fanout::FanoutHandle;
use plotcast_types::BroadcastEvent;
use plotcast_wire::unpack_envelope;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::transport::read_message;

/// How long one poll waits for a message before checking the stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay between connection attempts to a peer.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

const INBOX_CAPACITY: usize = 1024;

struct Running {
    stop: Arc<AtomicBool>,
    readers: JoinSet<()>,
    poll: JoinHandle<()>,
}

/// Feeds broadcast events from the bus into a fanout.
pub struct Subscriber {
    addrs: Vec<String>,
    fanout: FanoutHandle,
    poll_interval: Duration,
    reconnect_delay: Duration,
    running: Option<Running>,
}

impl Subscriber {
    /// A stopped subscriber for the given forwarder output addresses.
    pub fn new<I, S>(addrs: I, fanout: FanoutHandle) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addrs: addrs.into_iter().map(Into::into).collect(),
            fanout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            running: None,
        }
    }

    /// Set how often the poll loop checks the stop flag.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the delay between connection attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Start connecting and polling. Does nothing if already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let mut readers = JoinSet::new();
        for addr in &self.addrs {
            readers.spawn(read_from(addr.clone(), tx.clone(), self.reconnect_delay));
        }
        drop(tx);

        let poll = tokio::spawn(poll_loop(
            rx,
            self.fanout.clone(),
            Arc::clone(&stop),
            self.poll_interval,
        ));
        info!(addrs = ?self.addrs, "subscriber started");
        self.running = Some(Running {
            stop,
            readers,
            poll,
        });
    }

    /// Set the stop flag, close every peer connection and wait for the
    /// poll loop to exit. Calling it on a stopped subscriber does nothing.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::Release);
        running.readers.shutdown().await;
        if let Err(e) = running.poll.await {
            warn!(error = %e, "subscriber poll loop ended abnormally");
        }
        info!("subscriber stopped");
    }

    /// Whether the poll loop is running.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("addrs", &self.addrs)
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn read_from(addr: String, tx: mpsc::Sender<Vec<Bytes>>, reconnect_delay: Duration) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(addr = addr, "connected to bus");
                let mut reader = BufReader::new(stream);
                loop {
                    match read_message(&mut reader).await {
                        Ok(Some(frames)) => {
                            if tx.send(frames).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {
                            info!(addr = addr, "bus peer closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!(addr = addr, error = %e, "bus read failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => debug!(addr = addr, error = %e, "bus connect failed"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn poll_loop(
    mut rx: mpsc::Receiver<Vec<Bytes>>,
    fanout: FanoutHandle,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        let frames = match tokio::time::timeout(poll_interval, rx.recv()).await {
            Ok(Some(frames)) => frames,
            Ok(None) => {
                debug!("every bus reader has stopped");
                break;
            }
            Err(_elapsed) => continue,
        };
        let Some(event) = decode(frames) else {
            continue;
        };
        debug!(topic = %event.topic, exclude = event.exclude.len(), "bus event");
        if fanout.send(event).await.is_err() {
            warn!("fanout is gone, subscriber exiting");
            break;
        }
    }
}

/// Decode a bus message into an event, logging and returning `None` on
/// anything malformed.
fn decode(frames: Vec<Bytes>) -> Option<BroadcastEvent> {
    let envelope = unpack_envelope(frames);
    let [frame] = envelope.payload.as_slice() else {
        warn!(
            frames = envelope.payload.len(),
            prefix = envelope.routing_prefix.len(),
            "expected a single-frame bus payload"
        );
        return None;
    };
    match BroadcastEvent::from_slice(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "undecodable bus message");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_missing_exclude() {
        let frames = vec![Bytes::from_static(b"{\"topic\":\"T\",\"msg\":\"m\"}")];
        let event = decode(frames).unwrap();
        assert_eq!(event.topic.as_str(), "T");
        assert!(event.exclude.is_empty());
    }

    #[test]
    fn decode_skips_garbage_and_multi_frame() {
        assert!(decode(vec![Bytes::from_static(b"not json")]).is_none());
        assert!(decode(vec![Bytes::from_static(b"{}"), Bytes::from_static(b"{}")]).is_none());
        assert!(decode(vec![Bytes::from_static(b"peer"), Bytes::new()]).is_none());
    }

    #[test]
    fn decode_drops_routing_prefix() {
        let frames = vec![
            Bytes::from_static(b"peer-1"),
            Bytes::new(),
            Bytes::from_static(b"{\"topic\":\"T\",\"msg\":\"m\",\"exclude\":[\"c1\"]}"),
        ];
        let event = decode(frames).unwrap();
        assert_eq!(event.msg, "m");
        assert_eq!(event.exclude.len(), 1);
    }
}
