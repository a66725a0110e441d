//! WebSocket upgrade handler and per-connection event loop.
//!
//! The handshake token is verified before the upgrade completes; a bad
//! token never reaches the gateway state. After the upgrade the connection
//! runs a single select loop over inbound frames and its outbox, and the
//! disconnect path replays a leave for every meeting room it was still in.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{verify_token, Identity};
use crate::error::ApiError;
use crate::AppState;

use super::events::{server_event, ClientFrame, ServerFrame};
use super::registry::ConnectionHandle;
use super::{handler, lifecycle, rooms};

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let token = query.token.or_else(|| bearer_token(&headers));
    let identity = verify_token(&state.config.jwt_secret, token.as_deref())
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, identity)))
}

/// Token in the query string wins; the Authorization header is the
/// fallback for clients that can set it on the upgrade request.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let handle = state.connections.register(identity, out_tx);

    tracing::info!(
        connection_id = %handle.connection_id,
        user_id = %handle.identity.user_id,
        "connection established"
    );

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => handler::dispatch(&state, &handle, frame).await,
                            Err(e) => {
                                handle.send(ServerFrame::error(&format!("invalid frame: {e}")));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(
                            ?e,
                            connection_id = %handle.connection_id,
                            "ws read error"
                        );
                        break;
                    }
                    _ => continue,
                }
            }

            frame = out_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::warn!(?e, "outbound frame serialization failed");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    cleanup(&state, &handle).await;

    tracing::info!(
        connection_id = %handle.connection_id,
        user_id = %handle.identity.user_id,
        "connection ended"
    );
}

/// Disconnect is an implicit leave of everything: every joined room, every
/// meeting the connection was in, the registry entry, and presence.
async fn cleanup(state: &AppState, handle: &Arc<ConnectionHandle>) {
    let left = state.rooms.leave_all(handle);
    for room in &left {
        let Some(room_id) = room.strip_prefix(rooms::MEETING_ROOM_PREFIX) else {
            continue;
        };
        state.rooms.broadcast(
            &state.connections,
            room,
            Some(&handle.connection_id),
            &ServerFrame::new(
                server_event::USER_LEFT,
                serde_json::json!({ "connectionId": handle.connection_id }),
            ),
        );
        lifecycle::handle_leave(state, room_id, &handle.identity.user_id).await;
    }

    state.connections.unregister(&handle.connection_id);

    // Stale removal means the user already reconnected; stay silent then.
    if let Some(record) = state
        .presence
        .remove(&handle.identity.user_id, &handle.connection_id)
    {
        if let Some(org_id) = &record.org_id {
            state.rooms.broadcast(
                &state.connections,
                &rooms::org_room(org_id),
                Some(&handle.connection_id),
                &ServerFrame::new(
                    server_event::USER_STATUS_CHANGED,
                    serde_json::json!({
                        "userId": record.user_id,
                        "status": "offline",
                        "lastSeen": record.last_seen,
                    }),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::MockCollaborators;
    use crate::collab::MeetingMeta;
    use crate::gateway::signaling;
    use crate::gateway::testutil::{connect, test_state, test_state_with};

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }

    #[tokio::test]
    async fn disconnect_cascades_meeting_leave() {
        let collab = Arc::new(MockCollaborators::default().with_meeting(MeetingMeta {
            meeting_id: "meet_r1".to_string(),
            room_id: "r1".to_string(),
            channel_id: "ch_1".to_string(),
            channel_name: "general".to_string(),
            org_id: "org_1".to_string(),
        }));
        let state = test_state_with(collab);
        let (a, _rx_a) = connect(&state, "a");
        let (b, mut rx_b) = connect(&state, "b");

        signaling::join_room(&state, &a, "r1").await;
        signaling::join_room(&state, &b, "r1").await;
        while rx_b.try_recv().is_ok() {}

        // Transport drop, no explicit leave-room frame.
        cleanup(&state, &a).await;

        let frame = rx_b.try_recv().unwrap();
        assert_eq!(frame.event, server_event::USER_LEFT);
        assert_eq!(frame.data["connectionId"], a.connection_id.as_str());

        state
            .meetings
            .with_meeting("r1", |m| {
                assert_eq!(m.participants.len(), 1);
                assert!(m.participants.contains("b"));
            })
            .unwrap();
        assert!(state.connections.get(&a.connection_id).is_none());
    }

    #[tokio::test]
    async fn disconnect_announces_offline_to_org() {
        let state = test_state();
        let (a, _rx_a) = connect(&state, "a");
        let (b, mut rx_b) = connect(&state, "b");

        state
            .presence
            .set_online(&a.identity, &a.connection_id, None, None, Some("o1".into()));
        state.rooms.join(&a, &rooms::org_room("o1"));
        state.rooms.join(&b, &rooms::org_room("o1"));

        cleanup(&state, &a).await;

        let frame = rx_b.try_recv().unwrap();
        assert_eq!(frame.event, server_event::USER_STATUS_CHANGED);
        assert_eq!(frame.data["userId"], "a");
        assert_eq!(frame.data["status"], "offline");
        assert!(state.presence.resolve_connection("a").is_none());
    }

    #[tokio::test]
    async fn stale_disconnect_stays_silent_after_reconnect() {
        let state = test_state();
        let (old, _rx_old) = connect(&state, "a");
        state
            .presence
            .set_online(&old.identity, &old.connection_id, None, None, Some("o1".into()));

        // Reconnect replaces presence before the old transport unwinds.
        let (new, _rx_new) = connect(&state, "a");
        state
            .presence
            .set_online(&new.identity, &new.connection_id, None, None, Some("o1".into()));

        let (b, mut rx_b) = connect(&state, "b");
        state.rooms.join(&b, &rooms::org_room("o1"));

        cleanup(&state, &old).await;

        assert!(rx_b.try_recv().is_err());
        assert_eq!(
            state.presence.resolve_connection("a").unwrap(),
            new.connection_id
        );
        assert!(state.connections.resolve_user("a").is_some());
    }
}
