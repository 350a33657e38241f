//! Layered wire codec for the plotcast bridge.
//!
//! Three independent layers compose, outermost first:
//!
//! ```text
//! [routing prefix..] [""] [client_id] [request_id] [control json] [meta] [data] ...
//! \___ envelope ___/       \____________________ message _____________________/
//!                                                 \_ rpc _/
//! ```
//!
//! - [`envelope`] -- routing-prefix framing for request/reply transports
//! - [`message`] -- client id, request id, JSON control object, data frames
//! - [`data`] -- numeric arrays as raw little-endian buffers, everything else opaque
//! - [`rpc`] -- the `rpcResponse` wrapper distinguishing RPC traffic
//!
//! Binary payloads never pass through JSON: an array travels as a small
//! metadata frame followed by its contiguous byte buffer.
//!
//! The bus subscriber strips routing prefixes with [`unpack_envelope`]
//! before decoding broadcast events. The message, data and rpc layers
//! serve request/reply traffic that carries arrays.

pub mod data;
pub mod envelope;
pub mod error;
pub mod message;
pub mod rpc;

pub use data::{DType, DataObject, Element, NdArray, deserialize_data, serialize_data};
pub use envelope::{Envelope, pack_envelope, unpack_envelope};
pub use error::WireError;
pub use message::{Message, pack_message, unpack_message};
pub use rpc::{RpcRequest, pack_rpc, unpack_rpc};

/// A single transport frame.
pub type Frame = bytes::Bytes;
