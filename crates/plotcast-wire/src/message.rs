//! Multi-part message layer.
//!
//! A message is the frame sequence
//! `[client_id, request_id, control_json, meta_1, data_1, ..., meta_n, data_n]`.
//! The control object carries structured JSON; the data frames carry
//! binary payloads that must not be forced through JSON.

use bytes::Bytes;
use plotcast_types::{ConnectionId, RequestId};

use crate::data::{DataObject, deserialize_data, serialize_data};
use crate::error::WireError;

/// Number of frames before the first data frame.
const HEADER_FRAMES: usize = 3;

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The peer that sent (or will receive) the message.
    pub client_id: ConnectionId,
    /// Correlates a response with its request.
    pub request_id: RequestId,
    /// Structured JSON control object.
    pub control: serde_json::Value,
    /// Binary data objects, in order.
    pub data: Vec<DataObject>,
}

impl Message {
    /// Create a message with no data objects.
    pub fn new(client_id: ConnectionId, request_id: RequestId, control: serde_json::Value) -> Self {
        Self {
            client_id,
            request_id,
            control,
            data: Vec::new(),
        }
    }

    /// Append a data object.
    #[must_use]
    pub fn with_data(mut self, object: impl Into<DataObject>) -> Self {
        self.data.push(object.into());
        self
    }

    /// Pack into frames.
    pub fn to_frames(&self) -> Result<Vec<Bytes>, WireError> {
        pack_message(&self.client_id, &self.request_id, &self.control, &self.data)
    }

    /// Unpack from frames.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        unpack_message(frames)
    }
}

/// Serialize a message into frames.
pub fn pack_message(
    client_id: &ConnectionId,
    request_id: &RequestId,
    control: &serde_json::Value,
    data: &[DataObject],
) -> Result<Vec<Bytes>, WireError> {
    let data_frames = serialize_data(data)?;
    let mut frames = Vec::with_capacity(data_frames.len().saturating_add(HEADER_FRAMES));
    frames.push(Bytes::copy_from_slice(client_id.as_str().as_bytes()));
    frames.push(Bytes::copy_from_slice(request_id.as_str().as_bytes()));
    frames.push(Bytes::from(serde_json::to_vec(control)?));
    frames.extend(data_frames);
    Ok(frames)
}

/// Decode frames produced by [`pack_message`].
pub fn unpack_message(frames: &[Bytes]) -> Result<Message, WireError> {
    let [client_id, request_id, control, data @ ..] = frames else {
        return Err(WireError::MissingFrames(frames.len()));
    };
    let client_id = utf8(client_id, "client_id")?;
    let request_id = utf8(request_id, "request_id")?;
    let control = serde_json::from_slice(control)?;
    let data = deserialize_data(data)?;
    Ok(Message {
        client_id: ConnectionId::from(client_id),
        request_id: RequestId::from(request_id),
        control,
        data,
    })
}

fn utf8(frame: &Bytes, field: &'static str) -> Result<String, WireError> {
    std::str::from_utf8(frame)
        .map(str::to_owned)
        .map_err(|source| WireError::InvalidUtf8 { field, source })
}
