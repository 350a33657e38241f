//! The broadcast event that flows over the bus.
//!
//! On the wire a [`BroadcastEvent`] is a single JSON frame:
//!
//! ```json
//! {"topic": "bokehplot:doc1", "msg": "...", "exclude": ["conn-2"]}
//! ```
//!
//! `exclude` lets a publisher suppress the echo back to the connection
//! that caused the change. Events are transient and never persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::ConnectionId;
use crate::topic::Topic;

/// One state-change notification addressed to every subscriber of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BroadcastEvent {
    /// The topic whose subscribers receive the message.
    pub topic: Topic,
    /// The payload, delivered to clients as `"<topic>:<msg>"`.
    pub msg: String,
    /// Connections that must not receive this event even if subscribed.
    #[serde(default)]
    pub exclude: BTreeSet<ConnectionId>,
}

impl BroadcastEvent {
    /// Create an event with an empty exclude set.
    pub fn new(topic: impl Into<Topic>, msg: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            msg: msg.into(),
            exclude: BTreeSet::new(),
        }
    }

    /// Replace the exclude set.
    #[must_use]
    pub fn with_exclude<I>(mut self, exclude: I) -> Self
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        self.exclude = exclude.into_iter().collect();
        self
    }

    /// Serialize to the bus JSON frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a bus JSON frame.
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
