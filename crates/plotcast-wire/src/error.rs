//! Error types for the wire codec.
//!
//! A malformed envelope is never an error (the whole input becomes
//! payload). Everything here signals corrupted protocol data that the
//! caller must not paper over.

/// Errors raised while packing or unpacking wire frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A message had fewer than the three mandatory header frames.
    #[error("message needs at least 3 frames, got {0}")]
    MissingFrames(usize),

    /// An id frame was not valid UTF-8.
    #[error("{field} frame is not valid UTF-8: {source}")]
    InvalidUtf8 {
        /// Which id frame failed.
        field: &'static str,
        /// The underlying decode error.
        source: std::str::Utf8Error,
    },

    /// A metadata frame was not followed by its data frame.
    #[error("metadata frame at index {0} has no data frame")]
    DanglingMetadata(usize),

    /// A metadata frame named a data kind this codec does not know.
    #[error("unknown data kind: {0}")]
    UnknownKind(String),

    /// An array metadata frame was missing a required field.
    #[error("array metadata missing field: {0}")]
    MissingField(&'static str),

    /// An array buffer did not match the size implied by dtype and shape.
    #[error("array buffer is {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// Bytes required by `dtype` and `shape`.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The element count implied by a shape overflowed `usize`.
    #[error("array shape {0:?} overflows")]
    ShapeOverflow(Vec<usize>),

    /// A typed view was requested with the wrong element type.
    #[error("array has dtype {actual}, requested {requested}")]
    DTypeMismatch {
        /// The array's dtype.
        actual: crate::data::DType,
        /// The dtype of the requested element type.
        requested: crate::data::DType,
    },

    /// A control object was not an RPC response wrapper.
    #[error("not an rpc response: {0}")]
    NotRpc(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
