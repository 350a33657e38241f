//! Topic-indexed fanout of broadcast events to live client connections.
//!
//! - [`MultiValuedDict`] is the compact multi-map behind both subscription
//!   indexes.
//! - [`FanoutManager`] holds connections, subscriptions and auth functions
//!   and delivers `"<topic>:<message>"` frames.
//! - [`FanoutHandle`] runs a manager inside its own task so the WebSocket
//!   handlers and the bus subscriber can share it.
//!
//! A connection that fails to accept a frame is dropped from every index
//! during the same send; the other subscribers are still served.

pub mod actor;
pub mod auth;
pub mod connection;
pub mod error;
pub mod manager;
pub mod multi_dict;

pub use actor::{FanoutCommand, FanoutHandle, FanoutTask, SubscribeOutcome};
pub use auth::{AuthFn, AuthRegistry, UnregisteredAuthPolicy};
pub use connection::{ChannelConnection, Connection};
pub use error::{DeliveryError, FanoutError};
pub use manager::{FanoutManager, FanoutStats, Registration, SendReport, SubscriptionGate};
pub use multi_dict::{MultiValuedDict, Values};
