//! The broadcast forwarder.
//!
//! Publishers connect to the input listener and write messages; every
//! message is relayed verbatim to every peer connected to the output
//! listener. The forwarder does not inspect payloads. Delivery is
//! at-most-once: an output peer that falls behind the relay buffer skips
//! the messages it missed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::transport::{encode_message, read_message, write_encoded};

/// Messages buffered per output peer before it starts skipping.
pub const DEFAULT_RELAY_CAPACITY: usize = 1024;

/// Addresses the forwarder actually bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderAddrs {
    /// Where publishers connect.
    pub input: SocketAddr,
    /// Where subscribers connect.
    pub output: SocketAddr,
}

struct Running {
    addrs: ForwarderAddrs,
    shutdown: watch::Sender<bool>,
    input_task: JoinHandle<()>,
    output_task: JoinHandle<()>,
}

/// Relays bus messages from input peers to output peers.
pub struct BroadcastForwarder {
    input: String,
    output: String,
    capacity: usize,
    output_peers: Arc<AtomicUsize>,
    running: Option<Running>,
}

impl BroadcastForwarder {
    /// A stopped forwarder for the given bind addresses (`host:port`).
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            capacity: DEFAULT_RELAY_CAPACITY,
            output_peers: Arc::new(AtomicUsize::new(0)),
            running: None,
        }
    }

    /// Set the per-peer relay buffer.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Bind both listeners and start relaying.
    ///
    /// Port `0` binds an ephemeral port; the returned addresses say which.
    pub async fn start(&mut self) -> Result<ForwarderAddrs, BusError> {
        if let Some(running) = &self.running {
            return Err(BusError::AlreadyRunning(running.addrs.input));
        }

        let input = bind(&self.input).await?;
        let output = bind(&self.output).await?;
        let addrs = ForwarderAddrs {
            input: input.local_addr()?,
            output: output.local_addr()?,
        };

        let (relay, _) = broadcast::channel(self.capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let input_task = tokio::spawn(accept_publishers(input, relay.clone(), shutdown_rx.clone()));
        let output_task = tokio::spawn(accept_subscribers(
            output,
            relay,
            Arc::clone(&self.output_peers),
            shutdown_rx,
        ));

        info!(input = %addrs.input, output = %addrs.output, "forwarder started");
        self.running = Some(Running {
            addrs,
            shutdown,
            input_task,
            output_task,
        });
        Ok(addrs)
    }

    /// Close both listeners and every peer socket, then wait for the
    /// relay tasks to finish. Nothing is relayed once this returns.
    /// Calling it on a stopped forwarder does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // Receivers may already be gone if a task died; joining reports it.
        let _ = running.shutdown.send(true);
        for (side, task) in [("input", running.input_task), ("output", running.output_task)] {
            if let Err(e) = task.await {
                warn!(side, error = %e, "forwarder task ended abnormally");
            }
        }
        info!(input = %running.addrs.input, output = %running.addrs.output, "forwarder stopped");
    }

    /// Whether the forwarder is relaying.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound addresses while running.
    pub fn addrs(&self) -> Option<ForwarderAddrs> {
        self.running.as_ref().map(|running| running.addrs)
    }

    /// Output peers currently connected.
    pub fn output_peer_count(&self) -> usize {
        self.output_peers.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BroadcastForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastForwarder")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("running", &self.is_running())
            .field("output_peers", &self.output_peer_count())
            .finish()
    }
}

async fn bind(addr: &str) -> Result<TcpListener, BusError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| BusError::Bind {
            addr: addr.to_owned(),
            source,
        })
}

async fn accept_publishers(
    listener: TcpListener,
    relay: broadcast::Sender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut peers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "publisher connected");
                    peers.spawn(relay_from(stream, peer, relay.clone()));
                }
                Err(e) => warn!(error = %e, "accept on forwarder input failed"),
            },
            Some(_) = peers.join_next(), if !peers.is_empty() => {}
        }
    }
    peers.shutdown().await;
}

async fn relay_from(stream: TcpStream, peer: SocketAddr, relay: broadcast::Sender<Bytes>) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_message(&mut reader).await {
            Ok(Some(frames)) => match encode_message(&frames) {
                Ok(encoded) => {
                    let receivers = relay.send(encoded).unwrap_or(0);
                    debug!(%peer, frames = frames.len(), receivers, "relayed message");
                }
                Err(e) => warn!(%peer, error = %e, "dropping unencodable message"),
            },
            Ok(None) => {
                debug!(%peer, "publisher disconnected");
                return;
            }
            Err(e) => {
                warn!(%peer, error = %e, "dropping publisher after bad read");
                return;
            }
        }
    }
}

async fn accept_subscribers(
    listener: TcpListener,
    relay: broadcast::Sender<Bytes>,
    peer_count: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut peers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "subscriber connected");
                    peers.spawn(relay_to(stream, peer, relay.subscribe(), Arc::clone(&peer_count)));
                }
                Err(e) => warn!(error = %e, "accept on forwarder output failed"),
            },
            Some(_) = peers.join_next(), if !peers.is_empty() => {}
        }
    }
    peers.shutdown().await;
    peer_count.store(0, Ordering::Relaxed);
}

async fn relay_to(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut rx: broadcast::Receiver<Bytes>,
    peer_count: Arc<AtomicUsize>,
) {
    peer_count.fetch_add(1, Ordering::Relaxed);
    loop {
        match rx.recv().await {
            Ok(encoded) => {
                if let Err(e) = write_encoded(&mut stream, &encoded).await {
                    debug!(%peer, error = %e, "subscriber went away");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%peer, skipped, "subscriber lagging, messages skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    peer_count.fetch_sub(1, Ordering::Relaxed);
}
