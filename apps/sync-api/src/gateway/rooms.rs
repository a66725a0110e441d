//! Generic broadcast rooms: organization, channel, DM, meeting, and
//! meeting-chat groups a connection can join and leave. Broadcasts are
//! fire-and-forget with at-most-once delivery.

use std::collections::HashSet;

use dashmap::DashMap;

use super::events::ServerFrame;
use super::registry::{ConnectionHandle, ConnectionRegistry};

/// Room name helpers. Rooms are flat string keys namespaced by kind.
pub fn org_room(org_id: &str) -> String {
    format!("org:{org_id}")
}

pub fn channel_room(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

pub fn dm_room(user_id: &str) -> String {
    format!("dm:{user_id}")
}

pub fn meeting_room(room_id: &str) -> String {
    format!("meeting:{room_id}")
}

pub fn meeting_chat_room(room_id: &str) -> String {
    format!("meeting-chat:{room_id}")
}

/// Prefix for meeting rooms; disconnect cleanup uses it to find the
/// meetings a dropped connection was part of.
pub const MEETING_ROOM_PREFIX: &str = "meeting:";

/// Room membership, keyed by room name. Values are connection IDs.
pub struct RoomDirectory {
    rooms: DashMap<String, HashSet<String>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn join(&self, handle: &ConnectionHandle, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(handle.connection_id.clone());
        handle.rooms.lock().insert(room.to_string());
    }

    pub fn leave(&self, handle: &ConnectionHandle, room: &str) {
        self.remove_member(room, &handle.connection_id);
        handle.rooms.lock().remove(room);
    }

    /// Leave every room the connection joined; returns the rooms left.
    pub fn leave_all(&self, handle: &ConnectionHandle) -> Vec<String> {
        let rooms: Vec<String> = handle.rooms.lock().drain().collect();
        for room in &rooms {
            self.remove_member(room, &handle.connection_id);
        }
        rooms
    }

    fn remove_member(&self, room: &str, connection_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(connection_id);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms.remove_if(room, |_, m| m.is_empty());
            }
        }
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Broadcast to every member of a room except `except` (the sender).
    /// Pass `None` for an inclusive broadcast (read-receipt self-sync).
    pub fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        room: &str,
        except: Option<&str>,
        frame: &ServerFrame,
    ) {
        for connection_id in self.members(room) {
            if except == Some(connection_id.as_str()) {
                continue;
            }
            registry.send_to(&connection_id, frame.clone());
        }
    }
}
