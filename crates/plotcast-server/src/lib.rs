//! HTTP + `WebSocket` surface of the broadcast bridge.
//!
//! - **`WebSocket` endpoint** (`/ws`) where browser clients subscribe to
//!   topics and receive `"<topic>:<message>"` frames
//! - **REST endpoints** for health and fanout statistics
//!
//! # Architecture
//!
//! Every socket is a [`ChannelConnection`](plotcast_fanout::ChannelConnection)
//! registered with the shared [`FanoutHandle`](plotcast_fanout::FanoutHandle).
//! The socket task drains that channel into the client and turns client
//! requests into fanout commands.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use router::build_router;
pub use server::{Server, ServerConfig, ServerError};
pub use state::{AppState, ClientGuard};
