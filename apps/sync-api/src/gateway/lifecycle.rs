//! Meeting lifecycle coordination: start/end detection, exactly-once
//! report triggering, notification fan-out, and delayed cleanup of stale
//! meeting records.
//!
//! Failure policy: any error from the metadata, report, or notification
//! collaborators is logged and swallowed; lifecycle progress (user-left
//! broadcasts, participant removal, timer arming) never stalls on the
//! reporting pipeline.

use std::time::Duration;

use chrono::Utc;

use crate::collab::{CollabError, MeetingMeta, Notification, ReportInput};
use crate::AppState;

use super::events::{server_event, ServerFrame};
use super::meetings::{EndSnapshot, JoinOutcome, LeaveOutcome};
use super::registry::ConnectionHandle;

/// Called after a connection joined a meeting room. The first join of an
/// unseen room starts the meeting and fans out the start notification.
pub async fn handle_join(state: &AppState, handle: &ConnectionHandle, room_id: &str) {
    match state.meetings.join(room_id, &handle.identity) {
        JoinOutcome::Started => {
            tracing::info!(
                %room_id,
                user_id = %handle.identity.user_id,
                "meeting started"
            );
            announce_meeting_started(state, room_id, &handle.identity.name).await;
        }
        JoinOutcome::Joined => {}
    }
}

/// Called when a participant leaves a meeting room, explicitly or through
/// a transport disconnect. End handling runs synchronously before the
/// final participant is dropped from the current collections.
pub async fn handle_leave(state: &AppState, room_id: &str, user_id: &str) {
    match state.meetings.leave(room_id, user_id) {
        LeaveOutcome::NotInMeeting
        | LeaveOutcome::Remaining
        | LeaveOutcome::AlreadyEnding => {}
        LeaveOutcome::LastParticipant(snapshot) => {
            tracing::info!(%room_id, %user_id, "last participant leaving, meeting ending");
            end_of_meeting(state, &snapshot).await;
            state.meetings.finalize_leave(room_id, user_id);
            arm_deletion_timer(state, room_id);
        }
    }
}

/// Runs once per room, guarded by the ending flag set in the registry.
async fn end_of_meeting(state: &AppState, snapshot: &EndSnapshot) {
    let room_id = &snapshot.room_id;

    let meta = match state.collab.lookup_meeting_by_room(room_id).await {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            // Ad-hoc room with no durable record; nothing to report.
            tracing::debug!(%room_id, "no meeting metadata, skipping report");
            return;
        }
        Err(e) => {
            tracing::warn!(%room_id, error = %e, "meeting metadata lookup failed");
            return;
        }
    };

    let duration_secs = (Utc::now() - snapshot.started_at).num_seconds();
    if duration_secs < state.config.report_min_duration_secs {
        tracing::info!(%room_id, duration_secs, "meeting too short, skipping report");
        return;
    }

    // Second line of defense after the in-memory ending flag: a durable
    // existence check against duplicate end detection across handlers.
    match state.collab.report_exists(room_id).await {
        Ok(true) => {
            tracing::debug!(%room_id, "report already exists, skipping creation");
            return;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(%room_id, error = %e, "report existence check failed");
            return;
        }
    }

    let input = ReportInput {
        room_id: room_id.clone(),
        meeting_id: meta.meeting_id.clone(),
        participants: snapshot.participants.clone(),
        transcript: snapshot.transcript.clone(),
        duration_secs,
    };

    match state.collab.create_report(&input).await {
        Ok(report) => {
            tracing::info!(
                %room_id,
                report_id = %report.id,
                duration_secs,
                participants = input.participants.len(),
                "meeting report created"
            );
            announce_meeting_ended(state, &meta).await;
        }
        Err(CollabError::Conflict(_)) => {
            tracing::debug!(%room_id, "report created concurrently, treating as done");
        }
        Err(e) => {
            tracing::warn!(%room_id, error = %e, "report creation failed");
        }
    }
}

/// Arm the delayed cleanup for an empty room. A rejoin before it fires
/// cancels it and the meeting record survives.
pub fn arm_deletion_timer(state: &AppState, room_id: &str) {
    let delay = Duration::from_secs(state.config.meeting_cleanup_secs);
    let task_state = state.clone();
    let room = room_id.to_string();

    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if task_state.meetings.expire(&room) {
            tracing::info!(room_id = %room, "stale meeting record removed");
            if let Err(e) = task_state.collab.delete_meeting(&room).await {
                tracing::warn!(room_id = %room, error = %e, "meeting deletion failed");
            }
        }
    });

    state.meetings.store_timer(room_id, handle);
    tracing::debug!(%room_id, delay_secs = delay.as_secs(), "deletion timer armed");
}

async fn announce_meeting_started(state: &AppState, room_id: &str, started_by_name: &str) {
    let meta = match state.collab.lookup_meeting_by_room(room_id).await {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            // Ad-hoc rooms have no channel mapping; valid, nothing to announce.
            tracing::debug!(%room_id, "no meeting metadata, skipping start notification");
            return;
        }
        Err(e) => {
            tracing::warn!(%room_id, error = %e, "meeting metadata lookup failed");
            return;
        }
    };

    let message = format!("{started_by_name} started a meeting in #{}", meta.channel_name);
    let frame = ServerFrame::new(
        server_event::MEETING_STARTED_NOTIFICATION,
        serde_json::json!({
            "meetingId": meta.meeting_id,
            "channelName": meta.channel_name,
            "startedBy": started_by_name,
            "message": message,
        }),
    );
    fan_out(state, &meta, "meeting_started", "Meeting started", &message, frame).await;
}

async fn announce_meeting_ended(state: &AppState, meta: &MeetingMeta) {
    let message = format!("The meeting in #{} has ended", meta.channel_name);
    let frame = ServerFrame::new(
        server_event::MEETING_ENDED_NOTIFICATION,
        serde_json::json!({
            "meetingId": meta.meeting_id,
            "channelName": meta.channel_name,
            "message": message,
            "reportGenerated": true,
        }),
    );
    fan_out(state, meta, "meeting_ended", "Meeting ended", &message, frame).await;
}

/// Notify every org member with access to the meeting's channel: a durable
/// row for everyone, a real-time push only for those currently online.
async fn fan_out(
    state: &AppState,
    meta: &MeetingMeta,
    kind: &str,
    title: &str,
    body: &str,
    frame: ServerFrame,
) {
    let members = match state
        .collab
        .members_with_channel_access(&meta.org_id, &meta.channel_id)
        .await
    {
        Ok(members) => members,
        Err(e) => {
            tracing::warn!(
                meeting_id = %meta.meeting_id,
                error = %e,
                "channel member lookup failed, skipping notifications"
            );
            return;
        }
    };

    for member in members {
        let notification = Notification {
            user_id: member.user_id.clone(),
            org_id: meta.org_id.clone(),
            kind: kind.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            link: format!("/meetings/{}", meta.meeting_id),
        };
        if let Err(e) = state.collab.notify(&notification).await {
            tracing::warn!(user_id = %member.user_id, error = %e, "notification persist failed");
        }

        if let Some(connection_id) = state.presence.resolve_connection(&member.user_id) {
            state.connections.send_to(&connection_id, frame.clone());
        }
    }
}
