//! The broadcast bus.
//!
//! Publishers write events to a [`BroadcastForwarder`], which relays every
//! message to each connected [`Subscriber`]. The subscriber decodes the
//! events and hands them to a fanout. Messages travel over TCP as
//! length-prefixed frames (see [`transport`]).

pub mod error;
pub mod forwarder;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use error::BusError;
pub use forwarder::{BroadcastForwarder, ForwarderAddrs};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
