//! Shared application state for the broadcast server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plotcast_fanout::{FanoutError, FanoutHandle};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

/// Outbound frames buffered per client before it counts as too slow.
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

/// How long one drain pass waits for client tasks before disconnecting again.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor. All
/// subscription state lives behind the fanout handle.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the fanout task.
    pub fanout: FanoutHandle,
    /// Outbound buffer size for each new client.
    pub connection_buffer: usize,
    /// When the server state was created.
    pub started_at: DateTime<Utc>,
    clients: Arc<watch::Sender<usize>>,
}

impl AppState {
    /// State backed by `fanout` with the default connection buffer.
    pub fn new(fanout: FanoutHandle) -> Self {
        Self::with_connection_buffer(fanout, DEFAULT_CONNECTION_BUFFER)
    }

    /// State backed by `fanout` with a custom connection buffer.
    pub fn with_connection_buffer(fanout: FanoutHandle, connection_buffer: usize) -> Self {
        let (clients, _) = watch::channel(0);
        Self {
            fanout,
            connection_buffer: connection_buffer.max(1),
            started_at: Utc::now(),
            clients: Arc::new(clients),
        }
    }

    /// Count a `WebSocket` task as live until the guard drops.
    pub fn track_client(&self) -> ClientGuard {
        self.clients.send_modify(|count| *count = count.saturating_add(1));
        ClientGuard {
            clients: Arc::clone(&self.clients),
        }
    }

    /// Number of live `WebSocket` tasks.
    pub fn active_clients(&self) -> usize {
        *self.clients.borrow()
    }

    /// Watch the number of live `WebSocket` tasks.
    ///
    /// A task has released its fanout registration before its count drops.
    pub fn watch_clients(&self) -> watch::Receiver<usize> {
        self.clients.subscribe()
    }

    /// Close every client and wait for their tasks to finish.
    ///
    /// Repeats [`FanoutHandle::disconnect_all`] until no `WebSocket` task is
    /// live, so a task that registered or subscribed after an earlier pass
    /// is closed too. Returns whether every task finished within `limit`.
    pub async fn disconnect_clients(&self, limit: Duration) -> Result<bool, FanoutError> {
        let mut clients = self.watch_clients();
        let drained = timeout(limit, async {
            loop {
                let dropped = self.fanout.disconnect_all().await?;
                debug!(dropped, "disconnected clients");
                let settled = matches!(
                    timeout(DRAIN_POLL, clients.wait_for(|&count| count == 0)).await,
                    Ok(Ok(_))
                );
                if settled {
                    return Ok::<(), FanoutError>(());
                }
            }
        })
        .await;
        match drained {
            Ok(result) => result.map(|()| true),
            Err(_elapsed) => Ok(false),
        }
    }
}

/// Keeps one `WebSocket` task counted in [`AppState::active_clients`].
#[derive(Debug)]
pub struct ClientGuard {
    clients: Arc<watch::Sender<usize>>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.clients
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use plotcast_fanout::{FanoutHandle, FanoutManager};

    use super::*;

    #[tokio::test]
    async fn client_guard_counts_live_tasks() {
        let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 4);
        let state = AppState::new(fanout);
        let first = state.track_client();
        let second = state.track_client();
        assert_eq!(state.active_clients(), 2);
        drop(first);
        drop(second);
        assert_eq!(state.active_clients(), 0);
    }

    #[tokio::test]
    async fn disconnect_clients_times_out_while_a_task_lingers() {
        let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 4);
        let state = AppState::new(fanout);
        let lingering = state.track_client();
        let drained = state
            .disconnect_clients(Duration::from_millis(250))
            .await
            .unwrap();
        assert!(!drained);
        drop(lingering);
        assert!(state.disconnect_clients(Duration::from_secs(1)).await.unwrap());
    }
}
