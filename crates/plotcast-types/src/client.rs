//! Control messages exchanged with browser clients.
//!
//! Clients send JSON objects tagged by `msgtype`. The server answers on
//! the same socket with a [`ServerMessage`], framed like any broadcast as
//! `"<topic>:<json>"` so the client-side decoder needs only one code path.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::topic::Topic;

/// A request from a browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// Ask to receive every broadcast on `topic`.
    Subscribe {
        /// The topic to join.
        topic: Topic,
        /// Opaque token handed to the topic's auth function.
        #[serde(default)]
        auth: Option<String>,
    },
    /// Stop receiving broadcasts on `topic`.
    Unsubscribe {
        /// The topic to leave.
        topic: Topic,
    },
}

/// A reply from the server to a browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Positive acknowledgement, e.g. `["subscribesuccess", topic, client_id]`.
    Status {
        /// Status words, most significant first.
        status: Vec<String>,
    },
    /// The request could not be honoured.
    Error {
        /// Human-readable reason.
        msg: String,
    },
}

impl ServerMessage {
    /// Build a status reply.
    pub fn status<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Status {
            status: words.into_iter().map(Into::into).collect(),
        }
    }

    /// Build an error reply.
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { msg: msg.into() }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
