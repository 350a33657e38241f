//! Routing-prefix envelope.
//!
//! Request/reply transports prepend the identities of the peers a message
//! passed through so the reply can find its way back. The prefix is
//! separated from the payload by a single empty frame.

use bytes::Bytes;

/// Frames split into the routing prefix and the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Peer identities, outermost first. Empty when the transport adds none.
    pub routing_prefix: Vec<Bytes>,
    /// The frames after the separator.
    pub payload: Vec<Bytes>,
}

impl Envelope {
    /// Pack this envelope back into frames.
    pub fn into_frames(self) -> Vec<Bytes> {
        pack_envelope(self.routing_prefix, self.payload)
    }
}

/// Join `prefix`, one empty separator frame, and `payload`.
pub fn pack_envelope(prefix: Vec<Bytes>, payload: Vec<Bytes>) -> Vec<Bytes> {
    let mut frames = prefix;
    frames.reserve(payload.len().saturating_add(1));
    frames.push(Bytes::new());
    frames.extend(payload);
    frames
}

/// Split `frames` at the first empty frame.
///
/// Without a separator the prefix is empty and every frame is payload.
pub fn unpack_envelope(mut frames: Vec<Bytes>) -> Envelope {
    match frames.iter().position(Bytes::is_empty) {
        Some(split) => {
            let payload = frames.split_off(split.saturating_add(1));
            frames.truncate(split);
            Envelope {
                routing_prefix: frames,
                payload,
            }
        }
        None => {
            tracing::trace!(frames = frames.len(), "no envelope separator, treating all as payload");
            Envelope {
                routing_prefix: Vec::new(),
                payload: frames,
            }
        }
    }
}
