//! Task-owned access to a [`FanoutManager`].
//!
//! One tokio task owns the manager and applies [`FanoutCommand`]s in the
//! order they arrive. Every other task talks to it through a cloneable
//! [`FanoutHandle`]. Queries carry a oneshot reply channel; broadcasts are
//! fire-and-forget.

use std::collections::BTreeSet;

use plotcast_types::{BroadcastEvent, ConnectionId, Topic};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthFn;
use crate::connection::Connection;
use crate::error::FanoutError;
use crate::manager::{FanoutManager, FanoutStats, Registration, SendReport};

/// Outcome of [`FanoutHandle::subscribe_authorized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The subscription was recorded.
    Subscribed,
    /// The auth function rejected the token.
    Unauthorized,
    /// The subscription gate refused the pair.
    Refused,
}

/// A request applied by the manager task.
pub enum FanoutCommand {
    /// Register a connection handle.
    AddConnection {
        /// The handle frames are delivered through.
        connection: Box<dyn Connection>,
        /// Requested id; a fresh one is generated when `None`.
        id: Option<ConnectionId>,
        /// Receives the id actually used.
        reply: oneshot::Sender<ConnectionId>,
    },
    /// Register a connection handle and report its generation.
    RegisterConnection {
        /// The handle frames are delivered through.
        connection: Box<dyn Connection>,
        /// Requested id; a fresh one is generated when `None`.
        id: Option<ConnectionId>,
        /// Receives the registration.
        reply: oneshot::Sender<Registration>,
    },
    /// Drop a connection and all its subscriptions.
    RemoveConnection {
        /// The connection to drop.
        id: ConnectionId,
    },
    /// Drop a connection unless its id was registered again since.
    ReleaseConnection {
        /// The registration to release.
        registration: Registration,
    },
    /// Subscribe without consulting auth.
    Subscribe {
        /// The subscribing connection.
        id: ConnectionId,
        /// The topic.
        topic: Topic,
        /// Receives whether the subscription was recorded.
        reply: oneshot::Sender<bool>,
    },
    /// Check auth, then subscribe, as one step.
    SubscribeAuthorized {
        /// The subscribing connection.
        id: ConnectionId,
        /// The topic.
        topic: Topic,
        /// The client's auth token.
        token: Option<String>,
        /// Receives the outcome.
        reply: oneshot::Sender<SubscribeOutcome>,
    },
    /// Remove one subscription.
    Unsubscribe {
        /// The connection.
        id: ConnectionId,
        /// The topic.
        topic: Topic,
        /// Receives whether a subscription was removed.
        reply: oneshot::Sender<bool>,
    },
    /// Evaluate auth without subscribing.
    Auth {
        /// The client's auth token.
        token: Option<String>,
        /// The topic.
        topic: Topic,
        /// Receives the decision.
        reply: oneshot::Sender<bool>,
    },
    /// Register an auth function.
    RegisterAuth {
        /// Topic prefix the function handles.
        auth_type: String,
        /// The function.
        func: AuthFn,
    },
    /// Fan an event out to its topic's subscribers.
    Send {
        /// The event.
        event: BroadcastEvent,
        /// Receives the report, when the caller wants it.
        reply: Option<oneshot::Sender<SendReport>>,
    },
    /// Report table sizes.
    Stats {
        /// Receives the stats.
        reply: oneshot::Sender<FanoutStats>,
    },
    /// List a topic's subscribers.
    Subscribers {
        /// The topic.
        topic: Topic,
        /// Receives the ids.
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    /// List a connection's topics.
    TopicsOf {
        /// The connection.
        id: ConnectionId,
        /// Receives the topics.
        reply: oneshot::Sender<Vec<Topic>>,
    },
    /// Drop every connection and subscription.
    DisconnectAll {
        /// Receives how many connections were dropped.
        reply: oneshot::Sender<usize>,
    },
    /// Stop the task after this command.
    Shutdown,
}

impl core::fmt::Debug for FanoutCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::AddConnection { .. } => "AddConnection",
            Self::RegisterConnection { .. } => "RegisterConnection",
            Self::RemoveConnection { .. } => "RemoveConnection",
            Self::ReleaseConnection { .. } => "ReleaseConnection",
            Self::Subscribe { .. } => "Subscribe",
            Self::SubscribeAuthorized { .. } => "SubscribeAuthorized",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::Auth { .. } => "Auth",
            Self::RegisterAuth { .. } => "RegisterAuth",
            Self::Send { .. } => "Send",
            Self::Stats { .. } => "Stats",
            Self::Subscribers { .. } => "Subscribers",
            Self::TopicsOf { .. } => "TopicsOf",
            Self::DisconnectAll { .. } => "DisconnectAll",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Cloneable handle to a running manager task.
#[derive(Debug, Clone)]
pub struct FanoutHandle {
    tx: mpsc::Sender<FanoutCommand>,
}

/// The running manager task. Joining it returns the manager.
#[derive(Debug)]
pub struct FanoutTask {
    handle: JoinHandle<FanoutManager>,
}

impl FanoutTask {
    /// Wait for the task to stop and take back the manager.
    pub async fn join(self) -> Result<FanoutManager, FanoutError> {
        Ok(self.handle.await?)
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl FanoutHandle {
    /// Move `manager` into a new task with a command queue of `buffer`.
    pub fn spawn(manager: FanoutManager, buffer: usize) -> (Self, FanoutTask) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(run(manager, rx));
        (Self { tx }, FanoutTask { handle })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> FanoutCommand,
    ) -> Result<T, FanoutError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_closed| FanoutError::Closed)?;
        response.await.map_err(|_dropped| FanoutError::Closed)
    }

    async fn command(&self, command: FanoutCommand) -> Result<(), FanoutError> {
        self.tx
            .send(command)
            .await
            .map_err(|_closed| FanoutError::Closed)
    }

    /// Register a connection handle. See [`FanoutManager::add_connection`].
    pub async fn add_connection(
        &self,
        connection: Box<dyn Connection>,
        id: Option<ConnectionId>,
    ) -> Result<ConnectionId, FanoutError> {
        self.request(|reply| FanoutCommand::AddConnection {
            connection,
            id,
            reply,
        })
        .await
    }

    /// Drop a connection and every subscription it holds.
    pub async fn remove_connection(&self, id: ConnectionId) -> Result<(), FanoutError> {
        self.command(FanoutCommand::RemoveConnection { id }).await
    }

    /// Register a connection handle and get back its [`Registration`].
    ///
    /// See [`FanoutManager::register_connection`].
    pub async fn register_connection(
        &self,
        connection: Box<dyn Connection>,
        id: Option<ConnectionId>,
    ) -> Result<Registration, FanoutError> {
        self.request(|reply| FanoutCommand::RegisterConnection {
            connection,
            id,
            reply,
        })
        .await
    }

    /// Drop the connection `registration` refers to, unless its id has
    /// been registered again since.
    pub async fn release_connection(&self, registration: Registration) -> Result<(), FanoutError> {
        self.command(FanoutCommand::ReleaseConnection { registration })
            .await
    }

    /// Subscribe without an auth check.
    ///
    /// Records the subscription even when the topic's auth function would
    /// refuse; use [`subscribe_authorized`](Self::subscribe_authorized)
    /// for client requests.
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> Result<bool, FanoutError> {
        self.request(|reply| FanoutCommand::Subscribe { id, topic, reply })
            .await
    }

    /// Check `token` against the topic's auth function, then subscribe.
    ///
    /// Both steps run inside the manager task, so no other command can
    /// interleave between them.
    pub async fn subscribe_authorized(
        &self,
        id: ConnectionId,
        topic: Topic,
        token: Option<String>,
    ) -> Result<SubscribeOutcome, FanoutError> {
        self.request(|reply| FanoutCommand::SubscribeAuthorized {
            id,
            topic,
            token,
            reply,
        })
        .await
    }

    /// Remove one subscription.
    pub async fn unsubscribe(&self, id: ConnectionId, topic: Topic) -> Result<bool, FanoutError> {
        self.request(|reply| FanoutCommand::Unsubscribe { id, topic, reply })
            .await
    }

    /// Evaluate auth for `topic` without subscribing.
    pub async fn auth(&self, token: Option<String>, topic: Topic) -> Result<bool, FanoutError> {
        self.request(|reply| FanoutCommand::Auth {
            token,
            topic,
            reply,
        })
        .await
    }

    /// Register an auth function for `auth_type`.
    pub async fn register_auth(
        &self,
        auth_type: impl Into<String>,
        func: AuthFn,
    ) -> Result<(), FanoutError> {
        self.command(FanoutCommand::RegisterAuth {
            auth_type: auth_type.into(),
            func,
        })
        .await
    }

    /// Queue a broadcast, waiting for room in the command queue.
    pub async fn send(&self, event: BroadcastEvent) -> Result<(), FanoutError> {
        self.command(FanoutCommand::Send { event, reply: None })
            .await
    }

    /// Queue a broadcast and wait for its delivery report.
    pub async fn send_with_report(&self, event: BroadcastEvent) -> Result<SendReport, FanoutError> {
        self.request(|reply| FanoutCommand::Send {
            event,
            reply: Some(reply),
        })
        .await
    }

    /// Broadcast `message` on `topic`, skipping `exclude`.
    pub async fn broadcast(
        &self,
        topic: Topic,
        message: impl Into<String>,
        exclude: BTreeSet<ConnectionId>,
    ) -> Result<(), FanoutError> {
        self.send(BroadcastEvent::new(topic, message).with_exclude(exclude))
            .await
    }

    /// Current table sizes.
    pub async fn stats(&self) -> Result<FanoutStats, FanoutError> {
        self.request(|reply| FanoutCommand::Stats { reply }).await
    }

    /// Ids subscribed to `topic`, sorted.
    pub async fn subscribers(&self, topic: Topic) -> Result<Vec<ConnectionId>, FanoutError> {
        self.request(|reply| FanoutCommand::Subscribers { topic, reply })
            .await
    }

    /// Topics `id` listens to, sorted.
    pub async fn topics_of(&self, id: ConnectionId) -> Result<Vec<Topic>, FanoutError> {
        self.request(|reply| FanoutCommand::TopicsOf { id, reply })
            .await
    }

    /// Drop every connection, closing their outbound streams.
    pub async fn disconnect_all(&self) -> Result<usize, FanoutError> {
        self.request(|reply| FanoutCommand::DisconnectAll { reply })
            .await
    }

    /// Ask the task to stop once it has applied every earlier command.
    pub async fn shutdown(&self) -> Result<(), FanoutError> {
        self.command(FanoutCommand::Shutdown).await
    }

    /// Whether the manager task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

async fn run(mut manager: FanoutManager, mut rx: mpsc::Receiver<FanoutCommand>) -> FanoutManager {
    info!("fanout manager started");
    while let Some(command) = rx.recv().await {
        if matches!(command, FanoutCommand::Shutdown) {
            debug!("fanout manager received shutdown");
            break;
        }
        apply(&mut manager, command);
    }
    rx.close();
    let stats = manager.stats();
    info!(
        connections = stats.connections,
        topics = stats.topics,
        "fanout manager stopped"
    );
    manager
}

fn apply(manager: &mut FanoutManager, command: FanoutCommand) {
    match command {
        FanoutCommand::AddConnection {
            connection,
            id,
            reply,
        } => {
            let id = manager.add_connection(connection, id);
            respond(reply, id);
        }
        FanoutCommand::RegisterConnection {
            connection,
            id,
            reply,
        } => {
            let registration = manager.register_connection(connection, id);
            respond(reply, registration);
        }
        FanoutCommand::RemoveConnection { id } => {
            manager.remove_connection(&id);
        }
        FanoutCommand::ReleaseConnection { registration } => {
            manager.release_connection(&registration);
        }
        FanoutCommand::Subscribe { id, topic, reply } => {
            respond(reply, manager.subscribe(id, topic));
        }
        FanoutCommand::SubscribeAuthorized {
            id,
            topic,
            token,
            reply,
        } => {
            let outcome = if manager.auth(token.as_deref(), &topic) {
                if manager.subscribe(id, topic) {
                    SubscribeOutcome::Subscribed
                } else {
                    SubscribeOutcome::Refused
                }
            } else {
                debug!(connection_id = %id, topic = %topic, "unauthorized subscribe");
                SubscribeOutcome::Unauthorized
            };
            respond(reply, outcome);
        }
        FanoutCommand::Unsubscribe { id, topic, reply } => {
            respond(reply, manager.unsubscribe(&id, &topic));
        }
        FanoutCommand::Auth {
            token,
            topic,
            reply,
        } => {
            respond(reply, manager.auth(token.as_deref(), &topic));
        }
        FanoutCommand::RegisterAuth { auth_type, func } => {
            manager.register_auth(auth_type, func);
        }
        FanoutCommand::Send { event, reply } => {
            let report = manager.send_event(&event);
            if let Some(reply) = reply {
                respond(reply, report);
            }
        }
        FanoutCommand::Stats { reply } => respond(reply, manager.stats()),
        FanoutCommand::Subscribers { topic, reply } => {
            respond(reply, manager.subscribers(&topic));
        }
        FanoutCommand::TopicsOf { id, reply } => respond(reply, manager.topics_of(&id)),
        FanoutCommand::DisconnectAll { reply } => respond(reply, manager.disconnect_all()),
        FanoutCommand::Shutdown => {}
    }
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        warn!("fanout caller went away before the reply");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::{AuthRegistry, UnregisteredAuthPolicy};
    use crate::connection::ChannelConnection;

    #[tokio::test]
    async fn handle_round_trips_commands() {
        let (fanout, task) = FanoutHandle::spawn(FanoutManager::new(), 16);
        let (conn, mut rx) = ChannelConnection::channel(8);
        let id = fanout
            .add_connection(Box::new(conn), Some(ConnectionId::from("c1")))
            .await
            .unwrap();
        assert!(fanout.subscribe(id.clone(), Topic::from("T")).await.unwrap());

        fanout
            .broadcast(Topic::from("T"), "hello", BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), "T:hello");

        assert_eq!(fanout.topics_of(id.clone()).await.unwrap(), vec![Topic::from("T")]);
        fanout.remove_connection(id).await.unwrap();
        assert!(fanout.stats().await.unwrap().is_idle());

        fanout.shutdown().await.unwrap();
        let manager = task.join().await.unwrap();
        assert!(manager.is_idle());
        assert!(matches!(fanout.stats().await, Err(FanoutError::Closed)));
    }

    #[tokio::test]
    async fn subscribe_authorized_reports_rejection() {
        let auth = AuthRegistry::new(UnregisteredAuthPolicy::Deny);
        let (fanout, _task) = FanoutHandle::spawn(FanoutManager::with_auth(auth), 4);
        fanout
            .register_auth(
                "doc",
                std::sync::Arc::new(|token: Option<&str>, _: &str| token == Some("secret")),
            )
            .await
            .unwrap();

        let id = ConnectionId::from("c1");
        let denied = fanout
            .subscribe_authorized(id.clone(), Topic::from("doc:1"), Some(String::from("nope")))
            .await
            .unwrap();
        assert_eq!(denied, SubscribeOutcome::Unauthorized);

        let unknown = fanout
            .subscribe_authorized(id.clone(), Topic::from("other:1"), None)
            .await
            .unwrap();
        assert_eq!(unknown, SubscribeOutcome::Unauthorized);

        let ok = fanout
            .subscribe_authorized(id.clone(), Topic::from("doc:1"), Some(String::from("secret")))
            .await
            .unwrap();
        assert_eq!(ok, SubscribeOutcome::Subscribed);
        assert_eq!(fanout.subscribers(Topic::from("doc:1")).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn send_with_report_counts_exclusions() {
        let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 4);
        let mut receivers = Vec::new();
        for name in ["a", "b"] {
            let (conn, rx) = ChannelConnection::channel(4);
            receivers.push(rx);
            let id = fanout
                .add_connection(Box::new(conn), Some(ConnectionId::from(name)))
                .await
                .unwrap();
            fanout.subscribe(id, Topic::from("T")).await.unwrap();
        }
        let event = BroadcastEvent::new(Topic::from("T"), "x")
            .with_exclude(BTreeSet::from([ConnectionId::from("a")]));
        let report = fanout.send_with_report(event).await.unwrap();
        assert_eq!(report.excluded, 1);
        assert_eq!(report.delivered, 1);
    }
}
