//! Inbound frame dispatch. Each frame is validated into its typed payload
//! and routed to the presence, room, meeting, or signaling component.
//! Validation failures are caller-scoped error frames and never broadcast.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::collab::TranscriptEntry;
use crate::AppState;

use super::events::{
    client_event, server_event, AddReactionPayload, ChannelPayload, ClientFrame, DmPayload,
    MarkReadPayload, MeetingChatPayload, OrgPayload, RoomPayload, SendMessagePayload,
    ServerFrame, TypingPayload, UpdateStatusPayload, UserOnlinePayload,
};
use super::registry::ConnectionHandle;
use super::{rooms, signaling};

/// Route one inbound frame. Any error is reported to the caller only.
pub async fn dispatch(state: &AppState, handle: &Arc<ConnectionHandle>, frame: ClientFrame) {
    if let Err(message) = route(state, handle, frame).await {
        handle.send(ServerFrame::error(&message));
    }
}

async fn route(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    frame: ClientFrame,
) -> Result<(), String> {
    match frame.event.as_str() {
        client_event::USER_ONLINE => user_online(state, handle, parse(frame.data)?),
        client_event::UPDATE_STATUS => update_status(state, handle, parse(frame.data)?),
        client_event::JOIN_ORGANIZATION => join_organization(state, handle, parse(frame.data)?),
        client_event::LEAVE_ORGANIZATION => leave_organization(state, handle, parse(frame.data)?),
        client_event::JOIN_CHANNEL => {
            let payload: ChannelPayload = parse(frame.data)?;
            state.rooms.join(handle, &rooms::channel_room(&payload.channel_id));
            Ok(())
        }
        client_event::LEAVE_CHANNEL => {
            let payload: ChannelPayload = parse(frame.data)?;
            state.rooms.leave(handle, &rooms::channel_room(&payload.channel_id));
            Ok(())
        }
        client_event::JOIN_DM => {
            let payload: DmPayload = parse(frame.data)?;
            state.rooms.join(handle, &rooms::dm_room(&payload.user_id));
            Ok(())
        }
        client_event::LEAVE_DM => {
            let payload: DmPayload = parse(frame.data)?;
            state.rooms.leave(handle, &rooms::dm_room(&payload.user_id));
            Ok(())
        }
        client_event::TYPING_START => {
            typing(state, handle, parse(frame.data)?, server_event::USER_TYPING)
        }
        client_event::TYPING_STOP => typing(
            state,
            handle,
            parse(frame.data)?,
            server_event::USER_STOPPED_TYPING,
        ),
        client_event::SEND_MESSAGE => send_message(state, handle, parse(frame.data)?).await,
        client_event::MARK_READ => mark_read(state, handle, parse(frame.data)?),
        client_event::ADD_REACTION => add_reaction(state, handle, parse(frame.data)?),
        client_event::JOIN_ROOM => {
            let payload: RoomPayload = parse(frame.data)?;
            signaling::join_room(state, handle, &payload.room_id).await;
            Ok(())
        }
        client_event::LEAVE_ROOM => {
            let payload: RoomPayload = parse(frame.data)?;
            signaling::leave_room(state, handle, &payload.room_id).await;
            Ok(())
        }
        client_event::SENDING_SIGNAL => {
            signaling::sending_signal(state, handle, parse(frame.data)?);
            Ok(())
        }
        client_event::RETURNING_SIGNAL => {
            signaling::returning_signal(state, handle, parse(frame.data)?);
            Ok(())
        }
        client_event::TOGGLE_VIDEO => {
            signaling::media_toggle(
                state,
                handle,
                server_event::USER_VIDEO_TOGGLE,
                parse(frame.data)?,
            );
            Ok(())
        }
        client_event::TOGGLE_AUDIO => {
            signaling::media_toggle(
                state,
                handle,
                server_event::USER_AUDIO_TOGGLE,
                parse(frame.data)?,
            );
            Ok(())
        }
        client_event::START_SCREEN_SHARE => {
            signaling::screen_share(
                state,
                handle,
                server_event::USER_START_SCREEN_SHARE,
                parse(frame.data)?,
            );
            Ok(())
        }
        client_event::STOP_SCREEN_SHARE => {
            signaling::screen_share(
                state,
                handle,
                server_event::USER_STOP_SCREEN_SHARE,
                parse(frame.data)?,
            );
            Ok(())
        }
        client_event::MEETING_CHAT => meeting_chat(state, handle, parse(frame.data)?),
        other => {
            tracing::debug!(event = %other, "unknown event");
            Err(format!("unknown event: {other}"))
        }
    }
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, String> {
    serde_json::from_value(data).map_err(|e| format!("invalid payload: {e}"))
}

fn user_online(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    payload: UserOnlinePayload,
) -> Result<(), String> {
    let record = state.presence.set_online(
        &handle.identity,
        &handle.connection_id,
        payload.name,
        payload.photo,
        payload.org_id.clone(),
    );
    tracing::debug!(user_id = %handle.identity.user_id, "user online");

    if let Some(org_id) = payload.org_id {
        let room = rooms::org_room(&org_id);
        state.rooms.join(handle, &room);

        handle.send(ServerFrame::new(
            server_event::ONLINE_USERS_LIST,
            serde_json::json!({ "users": state.presence.online_in_org(&org_id) }),
        ));
        state.rooms.broadcast(
            &state.connections,
            &room,
            Some(&handle.connection_id),
            &ServerFrame::new(
                server_event::USER_STATUS_CHANGED,
                serde_json::to_value(&record).map_err(|e| e.to_string())?,
            ),
        );
    }
    Ok(())
}

fn update_status(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    payload: UpdateStatusPayload,
) -> Result<(), String> {
    let Some(record) = state.presence.update_status(
        &handle.identity.user_id,
        &payload.status,
        payload.custom_status,
    ) else {
        // Status before user_online; nothing to update or announce.
        return Ok(());
    };

    if let Some(org_id) = &record.org_id {
        state.rooms.broadcast(
            &state.connections,
            &rooms::org_room(org_id),
            Some(&handle.connection_id),
            &ServerFrame::new(
                server_event::USER_STATUS_CHANGED,
                serde_json::to_value(&record).map_err(|e| e.to_string())?,
            ),
        );
    }
    Ok(())
}

fn join_organization(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    payload: OrgPayload,
) -> Result<(), String> {
    state
        .presence
        .set_org(&handle.identity.user_id, Some(payload.org_id.clone()));
    state.rooms.join(handle, &rooms::org_room(&payload.org_id));

    handle.send(ServerFrame::new(
        server_event::ONLINE_USERS_LIST,
        serde_json::json!({ "users": state.presence.online_in_org(&payload.org_id) }),
    ));
    Ok(())
}

fn leave_organization(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    payload: OrgPayload,
) -> Result<(), String> {
    state.rooms.leave(handle, &rooms::org_room(&payload.org_id));
    state.presence.set_org(&handle.identity.user_id, None);
    Ok(())
}

fn typing(
    state: &AppState,
    handle: &ConnectionHandle,
    payload: TypingPayload,
    event: &str,
) -> Result<(), String> {
    state.rooms.broadcast(
        &state.connections,
        &rooms::channel_room(&payload.channel_id),
        Some(&handle.connection_id),
        &ServerFrame::new(
            event,
            serde_json::json!({
                "channelId": payload.channel_id,
                "userId": handle.identity.user_id,
                "userName": payload.user_name,
            }),
        ),
    );
    Ok(())
}

/// Relay a chat message to the channel room, gated on channel access.
async fn send_message(
    state: &AppState,
    handle: &ConnectionHandle,
    payload: SendMessagePayload,
) -> Result<(), String> {
    let allowed = state
        .collab
        .has_channel_access(&handle.identity.user_id, &payload.channel_id)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "channel access check failed");
            "channel access check failed".to_string()
        })?;
    if !allowed {
        return Err("no access to channel".to_string());
    }

    let mut data = payload.message;
    data.insert(
        "channelId".to_string(),
        Value::String(payload.channel_id.clone()),
    );
    data.insert(
        "senderId".to_string(),
        Value::String(handle.identity.user_id.clone()),
    );
    state.rooms.broadcast(
        &state.connections,
        &rooms::channel_room(&payload.channel_id),
        Some(&handle.connection_id),
        &ServerFrame::new(server_event::NEW_MESSAGE, Value::Object(data)),
    );
    Ok(())
}

fn mark_read(
    state: &AppState,
    handle: &ConnectionHandle,
    payload: MarkReadPayload,
) -> Result<(), String> {
    // Inclusive broadcast: the reader's other devices sync their badge too.
    state.rooms.broadcast(
        &state.connections,
        &rooms::channel_room(&payload.channel_id),
        None,
        &ServerFrame::new(
            server_event::MESSAGES_READ,
            serde_json::json!({
                "channelId": payload.channel_id,
                "userId": handle.identity.user_id,
                "lastMessageId": payload.last_message_id,
            }),
        ),
    );
    Ok(())
}

fn add_reaction(
    state: &AppState,
    handle: &ConnectionHandle,
    payload: AddReactionPayload,
) -> Result<(), String> {
    state.rooms.broadcast(
        &state.connections,
        &rooms::channel_room(&payload.channel_id),
        Some(&handle.connection_id),
        &ServerFrame::new(
            server_event::REACTION_ADDED,
            serde_json::json!({
                "channelId": payload.channel_id,
                "messageId": payload.message_id,
                "emoji": payload.emoji,
                "userId": handle.identity.user_id,
            }),
        ),
    );
    Ok(())
}

/// Record the line in the meeting transcript, then relay it to the room.
fn meeting_chat(
    state: &AppState,
    handle: &ConnectionHandle,
    payload: MeetingChatPayload,
) -> Result<(), String> {
    let entry = TranscriptEntry {
        user_id: handle.identity.user_id.clone(),
        user_name: handle.identity.name.clone(),
        text: payload.text.clone(),
        sent_at: Utc::now(),
    };
    if !state.meetings.record_chat(&payload.room_id, entry) {
        return Err("no active meeting for room".to_string());
    }

    state.rooms.broadcast(
        &state.connections,
        &rooms::meeting_chat_room(&payload.room_id),
        Some(&handle.connection_id),
        &ServerFrame::new(
            server_event::MEETING_CHAT_MESSAGE,
            serde_json::json!({
                "roomId": payload.room_id,
                "userId": handle.identity.user_id,
                "userName": handle.identity.name,
                "text": payload.text,
            }),
        ),
    );
    Ok(())
}
