//! Wire-format frames and per-event payload types.
//!
//! Every inbound frame is `{"event": <name>, "data": {...}}`. Payloads are
//! validated into the typed structs below before they reach any component;
//! malformed frames get a caller-scoped `error` event and go no further.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame received from a client.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A frame sent to a client.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub event: String,
    pub data: Value,
}

impl ServerFrame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Caller-scoped error event. Never broadcast.
    pub fn error(message: &str) -> Self {
        Self::new(server_event::ERROR, serde_json::json!({ "message": message }))
    }
}

/// Client → server event names.
pub mod client_event {
    pub const USER_ONLINE: &str = "user_online";
    pub const UPDATE_STATUS: &str = "update_status";
    pub const JOIN_ORGANIZATION: &str = "join_organization";
    pub const LEAVE_ORGANIZATION: &str = "leave_organization";
    pub const JOIN_CHANNEL: &str = "join_channel";
    pub const LEAVE_CHANNEL: &str = "leave_channel";
    pub const JOIN_DM: &str = "join_dm";
    pub const LEAVE_DM: &str = "leave_dm";
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_STOP: &str = "typing_stop";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const MARK_READ: &str = "mark_read";
    pub const ADD_REACTION: &str = "add_reaction";
    pub const JOIN_ROOM: &str = "join-room";
    pub const LEAVE_ROOM: &str = "leave-room";
    pub const SENDING_SIGNAL: &str = "sending-signal";
    pub const RETURNING_SIGNAL: &str = "returning-signal";
    pub const TOGGLE_VIDEO: &str = "toggle-video";
    pub const TOGGLE_AUDIO: &str = "toggle-audio";
    pub const START_SCREEN_SHARE: &str = "start-screen-share";
    pub const STOP_SCREEN_SHARE: &str = "stop-screen-share";
    pub const MEETING_CHAT: &str = "meeting_chat";
}

/// Server → client event names.
pub mod server_event {
    pub const ERROR: &str = "error";
    pub const ONLINE_USERS_LIST: &str = "online_users_list";
    pub const USER_STATUS_CHANGED: &str = "user_status_changed";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STOPPED_TYPING: &str = "user_stopped_typing";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const MESSAGES_READ: &str = "messages_read";
    pub const REACTION_ADDED: &str = "reaction_added";
    pub const EXISTING_USERS: &str = "existing-users";
    pub const USER_JOINED: &str = "user-joined";
    pub const USER_LEFT: &str = "user-left";
    pub const RECEIVING_ANSWER: &str = "receiving-answer";
    pub const USER_VIDEO_TOGGLE: &str = "user-video-toggle";
    pub const USER_AUDIO_TOGGLE: &str = "user-audio-toggle";
    pub const USER_START_SCREEN_SHARE: &str = "user-start-screen-share";
    pub const USER_STOP_SCREEN_SHARE: &str = "user-stop-screen-share";
    pub const MEETING_CHAT_MESSAGE: &str = "meeting_chat_message";
    pub const MEETING_STARTED_NOTIFICATION: &str = "meeting_started_notification";
    pub const MEETING_ENDED_NOTIFICATION: &str = "meeting_ended_notification";
}

// ---------------------------------------------------------------------------
// Presence payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnlinePayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusPayload {
    pub status: String,
    #[serde(default)]
    pub custom_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgPayload {
    pub org_id: String,
}

// ---------------------------------------------------------------------------
// Channel / DM payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPayload {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmPayload {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub channel_id: String,
    pub user_name: String,
}

/// `send_message` carries the channel plus an opaque message body the
/// coordinator relays without interpreting.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub channel_id: String,
    #[serde(flatten)]
    pub message: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub channel_id: String,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReactionPayload {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
}

// ---------------------------------------------------------------------------
// Meeting / signaling payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingSignalPayload {
    pub user_to_signal: String,
    pub signal: Value,
    #[serde(rename = "callerID")]
    pub caller_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturningSignalPayload {
    #[serde(rename = "callerID")]
    pub caller_id: String,
    pub signal: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTogglePayload {
    pub room_id: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSharePayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingChatPayload {
    pub room_id: String,
    pub text: String,
}
