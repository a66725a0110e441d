//! Real-time gateway: connection registry, presence, rooms, meeting
//! lifecycle, and the WebSocket server loop that ties them together.

pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod meetings;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testutil;
