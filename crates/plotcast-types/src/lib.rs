//! Shared type definitions for the plotcast broadcast bridge.
//!
//! Every crate in the workspace speaks in terms of the types defined here.
//! Types that cross the browser boundary flow downstream to `TypeScript`
//! via `ts-rs` so the client-side decoder stays in lockstep.
//!
//! # Modules
//!
//! - [`ids`] -- Opaque string identifiers for connections and requests
//! - [`topic`] -- Broadcast topics and their `type:value` convention
//! - [`event`] -- The [`BroadcastEvent`] unit that flows over the bus
//! - [`client`] -- Control messages exchanged with browser clients

pub mod client;
pub mod event;
pub mod ids;
pub mod topic;

pub use client::{ClientMessage, ServerMessage};
pub use event::BroadcastEvent;
pub use ids::{ConnectionId, RequestId};
pub use topic::Topic;

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes the files to the `bindings/` directory relative
        // to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::ConnectionId::export_all();
        let _ = crate::ids::RequestId::export_all();
        let _ = crate::topic::Topic::export_all();
        let _ = crate::event::BroadcastEvent::export_all();
        let _ = crate::client::ClientMessage::export_all();
        let _ = crate::client::ServerMessage::export_all();
    }
}
