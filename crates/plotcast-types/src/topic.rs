//! Broadcast topics.
//!
//! A topic is an opaque string of the form `"<type>:<value>"`. The text
//! before the first `:` selects which authorization function, if any,
//! gates subscription to the topic. Nothing else about the shape of a
//! topic is interpreted.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Separator between the auth type and the remainder of a topic.
pub const TOPIC_SEPARATOR: char = ':';

/// A logical broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct Topic(String);

impl Topic {
    /// Wrap a topic string.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Borrow the full topic string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The auth type prefix, or `None` when the topic has no separator.
    pub fn auth_type(&self) -> Option<&str> {
        self.split().map(|(kind, _)| kind)
    }

    /// Everything after the first separator, or the whole topic when
    /// there is none.
    pub fn remainder(&self) -> &str {
        self.split().map_or(self.0.as_str(), |(_, rest)| rest)
    }

    /// Split into `(auth_type, remainder)` at the first separator.
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once(TOPIC_SEPARATOR)
    }

    /// Build the client delivery frame `"<topic>:<message>"`.
    pub fn frame(&self, message: &str) -> String {
        let mut frame = String::with_capacity(
            self.0.len().saturating_add(message.len()).saturating_add(1),
        );
        frame.push_str(&self.0);
        frame.push(TOPIC_SEPARATOR);
        frame.push_str(message);
        frame
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        Self(topic)
    }
}

impl From<&str> for Topic {
    fn from(topic: &str) -> Self {
        Self(topic.to_owned())
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::borrow::Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}
