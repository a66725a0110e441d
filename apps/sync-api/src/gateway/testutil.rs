//! Shared test helpers for gateway modules.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::collab::mock::MockCollaborators;
use crate::config::Config;
use crate::AppState;

use super::events::ServerFrame;
use super::registry::ConnectionHandle;

pub fn test_state() -> AppState {
    test_state_with(Arc::new(MockCollaborators::default()))
}

pub fn test_state_with(collab: Arc<MockCollaborators>) -> AppState {
    let config = Config {
        jwt_secret: "test-secret".to_string(),
        platform_api_url: String::new(),
        service_token: String::new(),
        port: 0,
        report_min_duration_secs: 30,
        meeting_cleanup_secs: 600,
    };
    AppState::new(config, collab)
}

/// Register a connection with a synthetic identity and hand back its
/// handle plus the receiving end of its outbox.
pub fn connect(
    state: &AppState,
    user_id: &str,
) -> (Arc<ConnectionHandle>, mpsc::UnboundedReceiver<ServerFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let identity = crate::auth::Identity {
        user_id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        name: format!("User {user_id}"),
    };
    (state.connections.register(identity, tx), rx)
}
