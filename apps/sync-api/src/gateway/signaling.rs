//! WebRTC signaling relay, scoped to meeting rooms. The relay forwards
//! offer/answer payloads without interpreting them; a signal whose target
//! cannot be resolved is silently dropped and the client renegotiates.

use std::sync::Arc;

use crate::AppState;

use super::events::{
    server_event, MediaTogglePayload, ReturningSignalPayload, ScreenSharePayload,
    SendingSignalPayload, ServerFrame,
};
use super::lifecycle;
use super::registry::ConnectionHandle;
use super::rooms;

/// Reply to the joiner with the peers already in the room, join, announce
/// the newcomer, then hand off to the lifecycle coordinator.
pub async fn join_room(state: &AppState, handle: &Arc<ConnectionHandle>, room_id: &str) {
    let room = rooms::meeting_room(room_id);

    // Gather peers before joining so the caller is not in its own list.
    let existing: Vec<serde_json::Value> = state
        .rooms
        .members(&room)
        .iter()
        .filter_map(|connection_id| state.connections.get(connection_id))
        .map(|peer| {
            serde_json::json!({
                "connectionId": peer.connection_id,
                "name": peer.identity.name,
                "email": peer.identity.email,
                "userId": peer.identity.user_id,
            })
        })
        .collect();
    handle.send(ServerFrame::new(
        server_event::EXISTING_USERS,
        serde_json::json!({ "users": existing }),
    ));

    state.rooms.join(handle, &room);
    state.rooms.join(handle, &rooms::meeting_chat_room(room_id));

    // No signaling payload yet; offers follow per-peer via sending-signal.
    state.rooms.broadcast(
        &state.connections,
        &room,
        Some(&handle.connection_id),
        &ServerFrame::new(
            server_event::USER_JOINED,
            serde_json::json!({
                "callerId": handle.connection_id,
                "name": handle.identity.name,
                "email": handle.identity.email,
                "userId": handle.identity.user_id,
            }),
        ),
    );

    lifecycle::handle_join(state, handle, room_id).await;
}

/// Offer relay: deliver to exactly the named target connection.
pub fn sending_signal(state: &AppState, handle: &ConnectionHandle, payload: SendingSignalPayload) {
    state.connections.send_to(
        &payload.user_to_signal,
        ServerFrame::new(
            server_event::USER_JOINED,
            serde_json::json!({
                "signal": payload.signal,
                "callerId": payload.caller_id,
                "name": handle.identity.name,
                "email": handle.identity.email,
                "userId": handle.identity.user_id,
            }),
        ),
    );
}

/// Answer relay back to the offering peer.
pub fn returning_signal(
    state: &AppState,
    handle: &ConnectionHandle,
    payload: ReturningSignalPayload,
) {
    state.connections.send_to(
        &payload.caller_id,
        ServerFrame::new(
            server_event::RECEIVING_ANSWER,
            serde_json::json!({
                "signal": payload.signal,
                "id": handle.connection_id,
            }),
        ),
    );
}

/// Announce departure to the room, leave it, then hand the lifecycle
/// bookkeeping to the coordinator.
pub async fn leave_room(state: &AppState, handle: &Arc<ConnectionHandle>, room_id: &str) {
    let room = rooms::meeting_room(room_id);
    state.rooms.broadcast(
        &state.connections,
        &room,
        Some(&handle.connection_id),
        &ServerFrame::new(
            server_event::USER_LEFT,
            serde_json::json!({ "connectionId": handle.connection_id }),
        ),
    );
    state.rooms.leave(handle, &room);
    state.rooms.leave(handle, &rooms::meeting_chat_room(room_id));

    lifecycle::handle_leave(state, room_id, &handle.identity.user_id).await;
}

/// Stateless media-flag broadcast; the relay holds no media state.
pub fn media_toggle(
    state: &AppState,
    handle: &ConnectionHandle,
    event: &str,
    payload: MediaTogglePayload,
) {
    state.rooms.broadcast(
        &state.connections,
        &rooms::meeting_room(&payload.room_id),
        Some(&handle.connection_id),
        &ServerFrame::new(
            event,
            serde_json::json!({
                "connectionId": handle.connection_id,
                "userId": handle.identity.user_id,
                "enabled": payload.enabled,
            }),
        ),
    );
}

pub fn screen_share(
    state: &AppState,
    handle: &ConnectionHandle,
    event: &str,
    payload: ScreenSharePayload,
) {
    state.rooms.broadcast(
        &state.connections,
        &rooms::meeting_room(&payload.room_id),
        Some(&handle.connection_id),
        &ServerFrame::new(
            event,
            serde_json::json!({
                "connectionId": handle.connection_id,
                "userId": handle.identity.user_id,
            }),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testutil::{connect, test_state};

    #[tokio::test]
    async fn join_room_replies_with_existing_users_then_announces() {
        let state = test_state();
        let (a, mut rx_a) = connect(&state, "a");
        let (b, mut rx_b) = connect(&state, "b");

        join_room(&state, &a, "r1").await;
        let frame = rx_a.try_recv().unwrap();
        assert_eq!(frame.event, server_event::EXISTING_USERS);
        assert_eq!(frame.data["users"].as_array().unwrap().len(), 0);

        join_room(&state, &b, "r1").await;
        let frame = rx_b.try_recv().unwrap();
        assert_eq!(frame.event, server_event::EXISTING_USERS);
        let users = frame.data["users"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["connectionId"], a.connection_id.as_str());

        // A hears about B joining, without a signal payload.
        let frame = rx_a.try_recv().unwrap();
        assert_eq!(frame.event, server_event::USER_JOINED);
        assert_eq!(frame.data["callerId"], b.connection_id.as_str());
        assert!(frame.data.get("signal").is_none());
    }

    #[tokio::test]
    async fn signals_are_relayed_to_exactly_one_target() {
        let state = test_state();
        let (a, mut rx_a) = connect(&state, "a");
        let (b, mut rx_b) = connect(&state, "b");
        let (_c, mut rx_c) = connect(&state, "c");

        sending_signal(
            &state,
            &a,
            SendingSignalPayload {
                user_to_signal: b.connection_id.clone(),
                signal: serde_json::json!({"sdp": "offer"}),
                caller_id: a.connection_id.clone(),
            },
        );

        let frame = rx_b.try_recv().unwrap();
        assert_eq!(frame.event, server_event::USER_JOINED);
        assert_eq!(frame.data["signal"]["sdp"], "offer");
        assert_eq!(frame.data["callerId"], a.connection_id.as_str());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());

        returning_signal(
            &state,
            &b,
            ReturningSignalPayload {
                caller_id: a.connection_id.clone(),
                signal: serde_json::json!({"sdp": "answer"}),
            },
        );
        let frame = rx_a.try_recv().unwrap();
        assert_eq!(frame.event, server_event::RECEIVING_ANSWER);
        assert_eq!(frame.data["id"], b.connection_id.as_str());
    }

    #[tokio::test]
    async fn unresolvable_signal_target_is_a_silent_drop() {
        let state = test_state();
        let (a, mut rx_a) = connect(&state, "a");

        sending_signal(
            &state,
            &a,
            SendingSignalPayload {
                user_to_signal: "conn_gone".to_string(),
                signal: serde_json::json!({}),
                caller_id: a.connection_id.clone(),
            },
        );
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_room_announces_before_lifecycle_handoff() {
        let state = test_state();
        let (a, mut rx_a) = connect(&state, "a");
        let (b, _rx_b) = connect(&state, "b");

        join_room(&state, &a, "r1").await;
        join_room(&state, &b, "r1").await;
        while rx_a.try_recv().is_ok() {}

        leave_room(&state, &b, "r1").await;
        let frame = rx_a.try_recv().unwrap();
        assert_eq!(frame.event, server_event::USER_LEFT);
        assert_eq!(frame.data["connectionId"], b.connection_id.as_str());

        state
            .meetings
            .with_meeting("r1", |m| {
                assert_eq!(m.participants.len(), 1);
                assert!(m.all_participants.get("b").unwrap().left_at.is_some());
            })
            .unwrap();
    }

    #[tokio::test]
    async fn media_toggles_reach_the_room_only() {
        let state = test_state();
        let (a, _rx_a) = connect(&state, "a");
        let (b, mut rx_b) = connect(&state, "b");
        let (_c, mut rx_c) = connect(&state, "c");

        join_room(&state, &a, "r1").await;
        join_room(&state, &b, "r1").await;
        while rx_b.try_recv().is_ok() {}

        media_toggle(
            &state,
            &a,
            server_event::USER_VIDEO_TOGGLE,
            MediaTogglePayload {
                room_id: "r1".to_string(),
                enabled: false,
            },
        );

        let frame = rx_b.try_recv().unwrap();
        assert_eq!(frame.event, server_event::USER_VIDEO_TOGGLE);
        assert_eq!(frame.data["enabled"], false);
        assert!(rx_c.try_recv().is_err());
    }
}
