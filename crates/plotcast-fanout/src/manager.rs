//! The topic-indexed fanout manager.
//!
//! [`FanoutManager`] owns the live-connection table and the two
//! subscription indexes (`topic -> connections`, `connection -> topics`).
//! Both indexes are updated together by every mutating method, so "who
//! listens to this topic" and "what does this connection listen to"
//! always agree.
//!
//! The manager is plain synchronous code that takes `&mut self`. Share it
//! across tasks through [`FanoutHandle`](crate::FanoutHandle), which gives
//! one task exclusive ownership.

use std::collections::{BTreeSet, HashMap};

use plotcast_types::{BroadcastEvent, ConnectionId, Topic};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::auth::{AuthFn, AuthRegistry};
use crate::connection::Connection;
use crate::multi_dict::MultiValuedDict;

/// An extra per-manager gate consulted before any subscription is recorded.
pub type SubscriptionGate = Box<dyn Fn(&ConnectionId, &Topic) -> bool + Send>;

/// Outcome of one [`FanoutManager::send`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Connections the frame was handed to.
    pub delivered: usize,
    /// Subscribed connections skipped because they were in the exclude set.
    pub excluded: usize,
    /// Subscribed ids with no live handle.
    pub missing: usize,
    /// Connections that failed and were purged.
    pub failed: Vec<ConnectionId>,
}

/// Sizes of the manager's tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutStats {
    /// Registered connection handles.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Connections subscribed to at least one topic.
    pub subscribed_connections: usize,
    /// Total `(topic, connection)` subscription pairs.
    pub subscriptions: usize,
}

impl FanoutStats {
    /// Whether every table is empty.
    pub const fn is_idle(&self) -> bool {
        self.connections == 0
            && self.topics == 0
            && self.subscribed_connections == 0
            && self.subscriptions == 0
    }
}

/// One registration of a connection handle under an id.
///
/// Re-registering an id bumps its generation, so releasing an older
/// registration leaves the newer handle and its subscriptions alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registration {
    /// The id the handle is registered under.
    pub id: ConnectionId,
    /// Generation of this registration.
    pub generation: u64,
}

struct Registered {
    handle: Box<dyn Connection>,
    generation: u64,
}

/// Routes broadcast events to the connections subscribed to their topic.
#[derive(Default)]
pub struct FanoutManager {
    connections: HashMap<ConnectionId, Registered>,
    next_generation: u64,
    topic_to_connections: MultiValuedDict<Topic, ConnectionId>,
    connection_to_topics: MultiValuedDict<ConnectionId, Topic>,
    auth: AuthRegistry,
    gate: Option<SubscriptionGate>,
}

impl FanoutManager {
    /// An empty manager with the default (allowing) auth policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty manager using `auth` for topic authorization.
    pub fn with_auth(auth: AuthRegistry) -> Self {
        Self {
            auth,
            ..Self::default()
        }
    }

    /// The auth registry.
    pub const fn auth_registry(&self) -> &AuthRegistry {
        &self.auth
    }

    /// Mutable access to the auth registry.
    pub const fn auth_registry_mut(&mut self) -> &mut AuthRegistry {
        &mut self.auth
    }

    /// Register (or replace) the auth function for `auth_type`.
    pub fn register_auth(&mut self, auth_type: impl Into<String>, func: AuthFn) {
        self.auth.register_arc(auth_type, func);
    }

    /// Decide whether `token` may subscribe to `topic`.
    pub fn auth(&self, token: Option<&str>, topic: &Topic) -> bool {
        self.auth.check(token, topic)
    }

    /// Install a gate consulted by [`can_subscribe`](Self::can_subscribe).
    pub fn set_subscription_gate(&mut self, gate: SubscriptionGate) {
        self.gate = Some(gate);
    }

    /// Whether `id` may subscribe to `topic`. Always true without a gate.
    pub fn can_subscribe(&self, id: &ConnectionId, topic: &Topic) -> bool {
        self.gate.as_ref().is_none_or(|gate| gate(id, topic))
    }

    /// Record that `id` listens to `topic`.
    ///
    /// Silently records nothing when [`can_subscribe`](Self::can_subscribe)
    /// refuses; the return value says which happened. No auth function is
    /// consulted here: a client-supplied token is checked by calling
    /// [`auth`](Self::auth) first, as
    /// [`FanoutHandle::subscribe_authorized`](crate::FanoutHandle::subscribe_authorized)
    /// does.
    pub fn subscribe(&mut self, id: ConnectionId, topic: Topic) -> bool {
        if !self.can_subscribe(&id, &topic) {
            debug!(connection_id = %id, topic = %topic, "subscription refused");
            return false;
        }
        debug!(connection_id = %id, topic = %topic, "subscribe");
        self.topic_to_connections.add(topic.clone(), id.clone());
        self.connection_to_topics.add(id, topic);
        true
    }

    /// Forget that `id` listens to `topic`.
    pub fn unsubscribe(&mut self, id: &ConnectionId, topic: &Topic) -> bool {
        let removed = self.topic_to_connections.remove_value(topic, id);
        self.connection_to_topics.remove_value(id, topic);
        if removed {
            debug!(connection_id = %id, topic = %topic, "unsubscribe");
        }
        removed
    }

    /// Register a connection handle under `id`, or a fresh id when `None`.
    ///
    /// Replacing an existing handle keeps its subscriptions.
    pub fn add_connection(
        &mut self,
        connection: Box<dyn Connection>,
        id: Option<ConnectionId>,
    ) -> ConnectionId {
        self.register_connection(connection, id).id
    }

    /// [`add_connection`](Self::add_connection), returning the
    /// [`Registration`] to hand back to
    /// [`release_connection`](Self::release_connection).
    pub fn register_connection(
        &mut self,
        connection: Box<dyn Connection>,
        id: Option<ConnectionId>,
    ) -> Registration {
        let id = id.unwrap_or_default();
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        debug!(connection_id = %id, generation, "add connection");
        let registered = Registered {
            handle: connection,
            generation,
        };
        if self.connections.insert(id.clone(), registered).is_some() {
            warn!(connection_id = %id, "replaced an existing connection handle");
        }
        Registration { id, generation }
    }

    /// Remove the connection registered by `registration`.
    ///
    /// A stale registration, whose id has since been registered again, is
    /// ignored. When no handle is registered under the id, its leftover
    /// subscriptions are removed. Returns whether anything was removed.
    pub fn release_connection(&mut self, registration: &Registration) -> bool {
        let id = &registration.id;
        match self.connections.get(id) {
            Some(current) if current.generation != registration.generation => {
                debug!(
                    connection_id = %id,
                    stale = registration.generation,
                    current = current.generation,
                    "ignoring release of a replaced connection"
                );
                false
            }
            Some(_) => self.remove_connection(id),
            None => self.remove_subscriptions(id) > 0,
        }
    }

    /// Subscribe `id` (or a fresh id) to `topic` and register its handle.
    pub fn subscribe_connection(
        &mut self,
        connection: Box<dyn Connection>,
        topic: Topic,
        id: Option<ConnectionId>,
    ) -> ConnectionId {
        let id = id.unwrap_or_default();
        self.subscribe(id.clone(), topic);
        self.add_connection(connection, Some(id))
    }

    /// Drop the handle for `id` and remove it from every topic.
    ///
    /// Returns whether a handle was registered.
    pub fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        let had_handle = self.connections.remove(id).is_some();
        let topics = self.remove_subscriptions(id);
        debug!(connection_id = %id, had_handle, topics, "remove connection");
        had_handle
    }

    /// Remove `id` from every topic it listens to, keeping its handle.
    ///
    /// Returns how many topics it was removed from.
    pub fn remove_subscriptions(&mut self, id: &ConnectionId) -> usize {
        let topics: Vec<Topic> = self.connection_to_topics.get(id).cloned().collect();
        for topic in &topics {
            self.topic_to_connections.remove_value(topic, id);
        }
        self.connection_to_topics.remove(id);
        topics.len()
    }

    /// Remove every subscription to `topic`.
    ///
    /// Returns how many connections were subscribed.
    pub fn remove_topic(&mut self, topic: &Topic) -> usize {
        let ids: Vec<ConnectionId> = self.topic_to_connections.get(topic).cloned().collect();
        for id in &ids {
            self.connection_to_topics.remove_value(id, topic);
        }
        self.topic_to_connections.remove(topic);
        debug!(topic = %topic, connections = ids.len(), "remove topic");
        ids.len()
    }

    /// Drop every connection handle and subscription.
    ///
    /// Closing a [`ChannelConnection`](crate::ChannelConnection)'s sender
    /// ends its client's outbound stream. Returns how many handles were
    /// dropped.
    pub fn disconnect_all(&mut self) -> usize {
        let dropped = self.connections.len();
        self.connections.clear();
        self.topic_to_connections = MultiValuedDict::new();
        self.connection_to_topics = MultiValuedDict::new();
        debug!(dropped, "disconnected every connection");
        dropped
    }

    /// Deliver `"<topic>:<message>"` to every subscriber of `topic` not in
    /// `exclude`.
    ///
    /// A connection whose handle fails is logged, dropped, and purged from
    /// both indexes; the remaining connections are still served. A topic
    /// with no subscribers is a silent no-op.
    pub fn send(
        &mut self,
        topic: &Topic,
        message: &str,
        exclude: &BTreeSet<ConnectionId>,
    ) -> SendReport {
        let mut report = SendReport::default();
        let recipients: Vec<ConnectionId> =
            self.topic_to_connections.get(topic).cloned().collect();
        if recipients.is_empty() {
            trace!(topic = %topic, "no subscribers");
            return report;
        }

        let frame = topic.frame(message);
        for id in recipients {
            if exclude.contains(&id) {
                report.excluded = report.excluded.saturating_add(1);
                continue;
            }
            let Some(connection) = self.connections.get(&id) else {
                report.missing = report.missing.saturating_add(1);
                continue;
            };
            match connection.handle.deliver(&frame) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(e) => {
                    warn!(
                        connection_id = %id,
                        topic = %topic,
                        error = %e,
                        "delivery failed, dropping connection"
                    );
                    self.remove_connection(&id);
                    report.failed.push(id);
                }
            }
        }
        debug!(
            topic = %topic,
            delivered = report.delivered,
            excluded = report.excluded,
            failed = report.failed.len(),
            "fanout complete"
        );
        report
    }

    /// [`send`](Self::send) an event's topic, message and exclude set.
    pub fn send_event(&mut self, event: &BroadcastEvent) -> SendReport {
        self.send(&event.topic, &event.msg, &event.exclude)
    }

    /// Ids subscribed to `topic`, sorted.
    pub fn subscribers(&self, topic: &Topic) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.topic_to_connections.get(topic).cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Topics `id` listens to, sorted.
    pub fn topics_of(&self, id: &ConnectionId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.connection_to_topics.get(id).cloned().collect();
        topics.sort_unstable();
        topics
    }

    /// Whether `id` is subscribed to `topic`.
    pub fn is_subscribed(&self, id: &ConnectionId, topic: &Topic) -> bool {
        self.topic_to_connections.contains(topic, id)
    }

    /// Whether a handle is registered for `id`.
    pub fn has_connection(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Sizes of every table.
    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            connections: self.connections.len(),
            topics: self.topic_to_connections.len(),
            subscribed_connections: self.connection_to_topics.len(),
            subscriptions: self.topic_to_connections.pair_count(),
        }
    }

    /// Whether every table is empty.
    pub fn is_idle(&self) -> bool {
        self.stats().is_idle()
    }
}

impl core::fmt::Debug for FanoutManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FanoutManager")
            .field("stats", &self.stats())
            .field("auth", &self.auth)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}
