//! RPC layer.
//!
//! Wraps a response as `{"type": "rpcResponse", "rpcResponse": ...}` so
//! request/response traffic can be told apart from free-form control
//! messages sharing the same substrate. Otherwise pass-through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WireError;

/// Value of the `type` field on a wrapped response.
pub const RPC_RESPONSE_TYPE: &str = "rpcResponse";

/// Wrap a response object.
pub fn pack_rpc(response: Value) -> Value {
    let mut wrapped = Map::with_capacity(2);
    wrapped.insert(String::from("type"), Value::from(RPC_RESPONSE_TYPE));
    wrapped.insert(String::from(RPC_RESPONSE_TYPE), response);
    Value::Object(wrapped)
}

/// Unwrap a response object produced by [`pack_rpc`].
pub fn unpack_rpc(wrapped: Value) -> Result<Value, WireError> {
    let Value::Object(mut map) = wrapped else {
        return Err(WireError::NotRpc(String::from("control object is not a map")));
    };
    if map.get("type").and_then(Value::as_str) != Some(RPC_RESPONSE_TYPE) {
        return Err(WireError::NotRpc(String::from("type is not rpcResponse")));
    }
    map.remove(RPC_RESPONSE_TYPE)
        .ok_or_else(|| WireError::NotRpc(String::from("missing rpcResponse field")))
}

/// The control object of an RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Name of the remote function.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RpcRequest {
    /// A call with no arguments.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Convert to a control object.
    pub fn to_control(&self) -> Result<Value, WireError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse from a control object.
    pub fn from_control(control: Value) -> Result<Self, WireError> {
        Ok(serde_json::from_value(control)?)
    }
}
