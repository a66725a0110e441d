//! Registry of live connections: identity attachment, per-connection outbox,
//! and user → connection resolution.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::auth::Identity;

use super::events::ServerFrame;

/// A live connection. Owned by the gateway; destroyed on disconnect, at
/// which point every room it joined is implicitly left.
pub struct ConnectionHandle {
    pub connection_id: String,
    pub identity: Identity,
    sender: mpsc::UnboundedSender<ServerFrame>,
    /// Rooms this connection has joined; drained during disconnect cleanup.
    pub rooms: Mutex<HashSet<String>>,
}

impl ConnectionHandle {
    /// Queue a frame for delivery. Best-effort: a frame to a closing
    /// connection is silently dropped.
    pub fn send(&self, frame: ServerFrame) {
        let _ = self.sender.send(frame);
    }
}

/// Shared registry of all open connections.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ConnectionHandle>>,
    /// Latest connection per user; a reconnect overwrites the old mapping.
    by_user: DashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Attach an identity to a fresh connection and hand back its handle.
    pub fn register(
        &self,
        identity: Identity,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) -> Arc<ConnectionHandle> {
        let connection_id = huddle_common::prefixed_ulid(huddle_common::id::prefix::CONNECTION);
        let handle = Arc::new(ConnectionHandle {
            connection_id: connection_id.clone(),
            identity,
            sender,
            rooms: Mutex::new(HashSet::new()),
        });
        self.by_user
            .insert(handle.identity.user_id.clone(), connection_id.clone());
        self.connections.insert(connection_id, handle.clone());
        handle
    }

    /// Remove a connection. The user mapping is only cleared if it still
    /// points at this connection; a reconnect may already have replaced it.
    pub fn unregister(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(connection_id)?;
        self.by_user
            .remove_if(&handle.identity.user_id, |_, current| {
                current.as_str() == connection_id
            });
        Some(handle)
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(connection_id).map(|e| e.clone())
    }

    /// Resolve a user to their current connection, if online. Absence is
    /// not an error, just "offline."
    pub fn resolve_user(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        let connection_id = self.by_user.get(user_id).map(|e| e.clone())?;
        self.get(&connection_id)
    }

    /// Deliver a frame to exactly the named connection, or drop it.
    /// Returns whether a target existed.
    pub fn send_to(&self, connection_id: &str, frame: ServerFrame) -> bool {
        match self.connections.get(connection_id) {
            Some(handle) => {
                handle.send(frame);
                true
            }
            None => false,
        }
    }
}
