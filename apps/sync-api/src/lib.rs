pub mod auth;
pub mod collab;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use collab::Collaborators;
use config::Config;
use gateway::meetings::MeetingRegistry;
use gateway::presence::PresenceDirectory;
use gateway::registry::ConnectionRegistry;
use gateway::rooms::RoomDirectory;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub collab: Arc<dyn Collaborators>,
    pub connections: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomDirectory>,
    pub presence: Arc<PresenceDirectory>,
    pub meetings: Arc<MeetingRegistry>,
}

impl AppState {
    pub fn new(config: Config, collab: Arc<dyn Collaborators>) -> Self {
        Self {
            config: Arc::new(config),
            collab,
            connections: Arc::new(ConnectionRegistry::new()),
            rooms: Arc::new(RoomDirectory::new()),
            presence: Arc::new(PresenceDirectory::new()),
            meetings: Arc::new(MeetingRegistry::new()),
        }
    }
}
