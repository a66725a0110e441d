//! Active-meeting registry: the authoritative participant bookkeeping and
//! last-participant end detection.
//!
//! Every mutation of a meeting happens under that room's `parking_lot`
//! mutex and runs to completion without suspension, so two handlers for
//! the same room can never interleave inside the check-and-set that
//! decides the meeting is ending. Collaborator I/O happens afterwards, in
//! `lifecycle`, against the snapshot taken under the lock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::collab::{ReportParticipant, TranscriptEntry};

/// Profile of a participant currently connected to the room.
#[derive(Debug, Clone)]
pub struct ParticipantDetail {
    pub name: String,
    pub email: String,
    pub joined_at: DateTime<Utc>,
}

/// Append-only history entry. Never removed while the meeting record
/// exists; `left_at` is cleared again on rejoin.
#[derive(Debug, Clone)]
pub struct ParticipantHistory {
    pub name: String,
    pub email: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

pub struct ActiveMeeting {
    pub room_id: String,
    pub started_by: String,
    pub started_by_name: String,
    pub started_at: DateTime<Utc>,
    /// Current membership.
    pub participants: HashSet<String>,
    /// Profiles for current members only.
    pub participant_details: HashMap<String, ParticipantDetail>,
    /// Authoritative history across joins, disconnects, and rejoins; the
    /// source for report generation.
    pub all_participants: HashMap<String, ParticipantHistory>,
    /// Meeting-chat transcript, captured for the report.
    pub chat_log: Vec<TranscriptEntry>,
    /// Set the instant the last participant is detected leaving; makes
    /// end handling idempotent against concurrent leave/disconnect events.
    pub is_ending: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First join for an unseen room created the meeting.
    Started,
    Joined,
}

/// Report inputs captured under the room lock at end detection, while the
/// current collections still include the final participant.
#[derive(Debug, Clone)]
pub struct EndSnapshot {
    pub room_id: String,
    pub started_at: DateTime<Utc>,
    pub participants: Vec<ReportParticipant>,
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Debug)]
pub enum LeaveOutcome {
    /// Room unknown or user not a current participant.
    NotInMeeting,
    /// Others remain; the user was removed and `left_at` stamped.
    Remaining,
    /// This was the last participant. The ending flag is now set and the
    /// caller owns end-of-meeting handling; the user stays in the current
    /// collections until `finalize_leave`.
    LastParticipant(EndSnapshot),
    /// A concurrent event already detected the end; nothing to do.
    AlreadyEnding,
}

/// Registry of active meetings and their pending deletion timers.
pub struct MeetingRegistry {
    meetings: DashMap<String, Mutex<ActiveMeeting>>,
    timers: DashMap<String, JoinHandle<()>>,
}

impl MeetingRegistry {
    pub fn new() -> Self {
        Self {
            meetings: DashMap::new(),
            timers: DashMap::new(),
        }
    }

    /// Add a participant, creating the meeting on first join. Any pending
    /// deletion timer is canceled and cleared, and the ending flag reset:
    /// a rejoin within the cleanup window reactivates the meeting with its
    /// full history intact.
    pub fn join(&self, room_id: &str, identity: &Identity) -> JoinOutcome {
        self.cancel_timer(room_id);

        let now = Utc::now();
        let mut created = false;
        let entry = self.meetings.entry(room_id.to_string()).or_insert_with(|| {
            created = true;
            Mutex::new(ActiveMeeting {
                room_id: room_id.to_string(),
                started_by: identity.user_id.clone(),
                started_by_name: identity.name.clone(),
                started_at: now,
                participants: HashSet::new(),
                participant_details: HashMap::new(),
                all_participants: HashMap::new(),
                chat_log: Vec::new(),
                is_ending: false,
            })
        });

        let mut meeting = entry.lock();
        meeting.is_ending = false;
        meeting.participants.insert(identity.user_id.clone());
        meeting.participant_details.insert(
            identity.user_id.clone(),
            ParticipantDetail {
                name: identity.name.clone(),
                email: identity.email.clone(),
                joined_at: now,
            },
        );
        meeting
            .all_participants
            .entry(identity.user_id.clone())
            .and_modify(|history| {
                history.joined_at = now;
                history.left_at = None;
            })
            .or_insert_with(|| ParticipantHistory {
                name: identity.name.clone(),
                email: identity.email.clone(),
                joined_at: now,
                left_at: None,
            });

        if created {
            JoinOutcome::Started
        } else {
            JoinOutcome::Joined
        }
    }

    /// Remove a participant, detecting whether they are the last one. The
    /// whole check-and-set runs under the room lock with no await.
    pub fn leave(&self, room_id: &str, user_id: &str) -> LeaveOutcome {
        let Some(entry) = self.meetings.get(room_id) else {
            return LeaveOutcome::NotInMeeting;
        };
        let mut meeting = entry.lock();
        if !meeting.participants.contains(user_id) {
            return LeaveOutcome::NotInMeeting;
        }

        let leaving_last = meeting.participants.len() == 1;
        if leaving_last && meeting.is_ending {
            // Duplicate of an in-flight end detection (e.g. explicit
            // leave-room followed by the transport disconnect).
            return LeaveOutcome::AlreadyEnding;
        }

        let now = Utc::now();
        if let Some(history) = meeting.all_participants.get_mut(user_id) {
            history.left_at = Some(now);
        }

        if leaving_last {
            meeting.is_ending = true;
            let snapshot = EndSnapshot {
                room_id: meeting.room_id.clone(),
                started_at: meeting.started_at,
                participants: meeting
                    .all_participants
                    .iter()
                    .map(|(id, history)| ReportParticipant {
                        user_id: id.clone(),
                        name: history.name.clone(),
                        email: history.email.clone(),
                        joined_at: history.joined_at,
                        left_at: history.left_at,
                    })
                    .collect(),
                transcript: meeting.chat_log.clone(),
            };
            LeaveOutcome::LastParticipant(snapshot)
        } else {
            meeting.participants.remove(user_id);
            meeting.participant_details.remove(user_id);
            LeaveOutcome::Remaining
        }
    }

    /// Drop the final participant from the current collections once end
    /// handling has run against the snapshot. A rejoin during end handling
    /// clears the ending flag; in that case the user is connected again and
    /// must not be evicted.
    pub fn finalize_leave(&self, room_id: &str, user_id: &str) {
        if let Some(entry) = self.meetings.get(room_id) {
            let mut meeting = entry.lock();
            if !meeting.is_ending {
                return;
            }
            meeting.participants.remove(user_id);
            meeting.participant_details.remove(user_id);
        }
    }

    /// Append a chat message to the transcript. Returns false for rooms
    /// with no active meeting.
    pub fn record_chat(&self, room_id: &str, entry: TranscriptEntry) -> bool {
        match self.meetings.get(room_id) {
            Some(meeting) => {
                meeting.lock().chat_log.push(entry);
                true
            }
            None => false,
        }
    }

    /// Track the deletion timer for a room, aborting any previous one.
    pub fn store_timer(&self, room_id: &str, handle: JoinHandle<()>) {
        if let Some((_, old)) = self.timers.remove(room_id) {
            old.abort();
        }
        self.timers.insert(room_id.to_string(), handle);
    }

    /// Cancel and clear the pending deletion timer, if any.
    pub fn cancel_timer(&self, room_id: &str) -> bool {
        match self.timers.remove(room_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Timer body: remove the meeting, but only if it is still empty and
    /// ending; a rejoin racing the timer wins.
    pub fn expire(&self, room_id: &str) -> bool {
        let removed = self.meetings.remove_if(room_id, |_, meeting| {
            let meeting = meeting.lock();
            meeting.participants.is_empty() && meeting.is_ending
        });
        self.timers.remove(room_id);
        removed.is_some()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.meetings.contains_key(room_id)
    }

    pub fn has_timer(&self, room_id: &str) -> bool {
        self.timers.contains_key(room_id)
    }

    /// Rewrite a meeting's start time so tests can drive the duration gate.
    #[cfg(test)]
    pub fn set_started_at_for_test(&self, room_id: &str, started_at: DateTime<Utc>) {
        if let Some(entry) = self.meetings.get(room_id) {
            entry.lock().started_at = started_at;
        }
    }

    /// Run a closure against a meeting's locked state.
    pub fn with_meeting<R>(
        &self,
        room_id: &str,
        f: impl FnOnce(&ActiveMeeting) -> R,
    ) -> Option<R> {
        self.meetings.get(room_id).map(|entry| f(&entry.lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            email: format!("{user_id}@example.com"),
            name: format!("User {user_id}"),
        }
    }

    fn assert_invariant(meeting: &ActiveMeeting) {
        for id in &meeting.participants {
            assert!(meeting.participant_details.contains_key(id));
        }
        for id in meeting.participant_details.keys() {
            assert!(meeting.all_participants.contains_key(id));
        }
    }

    #[test]
    fn first_join_creates_meeting() {
        let registry = MeetingRegistry::new();
        assert_eq!(registry.join("r1", &identity("a")), JoinOutcome::Started);
        assert_eq!(registry.join("r1", &identity("b")), JoinOutcome::Joined);

        registry
            .with_meeting("r1", |m| {
                assert_eq!(m.started_by, "a");
                assert_eq!(m.participants.len(), 2);
                assert_eq!(m.all_participants.len(), 2);
                assert_invariant(m);
            })
            .unwrap();
    }

    #[test]
    fn leave_with_others_remaining_stamps_history() {
        let registry = MeetingRegistry::new();
        registry.join("r1", &identity("a"));
        registry.join("r1", &identity("b"));

        assert!(matches!(
            registry.leave("r1", "a"),
            LeaveOutcome::Remaining
        ));

        registry
            .with_meeting("r1", |m| {
                assert!(!m.participants.contains("a"));
                assert!(!m.participant_details.contains_key("a"));
                // History survives the leave.
                let history = m.all_participants.get("a").unwrap();
                assert!(history.left_at.is_some());
                assert!(!m.is_ending);
                assert_invariant(m);
            })
            .unwrap();
    }

    #[test]
    fn last_leave_sets_ending_and_keeps_final_participant_visible() {
        let registry = MeetingRegistry::new();
        registry.join("r1", &identity("a"));

        let LeaveOutcome::LastParticipant(snapshot) = registry.leave("r1", "a") else {
            panic!("expected last-participant detection");
        };
        assert_eq!(snapshot.room_id, "r1");
        assert_eq!(snapshot.participants.len(), 1);
        assert!(snapshot.participants[0].left_at.is_some());

        // Until finalize, the final participant is still in the current
        // collections and the ending flag blocks a second detection.
        registry
            .with_meeting("r1", |m| {
                assert!(m.is_ending);
                assert!(m.participants.contains("a"));
            })
            .unwrap();
        assert!(matches!(
            registry.leave("r1", "a"),
            LeaveOutcome::AlreadyEnding
        ));

        registry.finalize_leave("r1", "a");
        registry
            .with_meeting("r1", |m| {
                assert!(m.participants.is_empty());
                assert!(m.participant_details.is_empty());
                assert_eq!(m.all_participants.len(), 1);
            })
            .unwrap();
    }

    #[test]
    fn rejoin_during_end_handling_survives_stale_finalize() {
        let registry = MeetingRegistry::new();
        registry.join("r1", &identity("a"));

        let LeaveOutcome::LastParticipant(_) = registry.leave("r1", "a") else {
            panic!("expected last-participant detection");
        };

        // End handling is still in flight when A rejoins; the rejoin resets
        // the ending flag, so the deferred finalize must not evict them.
        assert_eq!(registry.join("r1", &identity("a")), JoinOutcome::Joined);
        registry.finalize_leave("r1", "a");

        registry
            .with_meeting("r1", |m| {
                assert!(!m.is_ending);
                assert!(m.participants.contains("a"));
                assert!(m.participant_details.contains_key("a"));
                assert!(m.all_participants.get("a").unwrap().left_at.is_none());
                assert_invariant(m);
            })
            .unwrap();

        // The meeting is still live: a later leave ends it normally.
        assert!(matches!(
            registry.leave("r1", "a"),
            LeaveOutcome::LastParticipant(_)
        ));
    }

    #[test]
    fn leave_unknown_room_or_user_is_noop() {
        let registry = MeetingRegistry::new();
        assert!(matches!(
            registry.leave("r1", "a"),
            LeaveOutcome::NotInMeeting
        ));

        registry.join("r1", &identity("a"));
        assert!(matches!(
            registry.leave("r1", "ghost"),
            LeaveOutcome::NotInMeeting
        ));
    }

    #[test]
    fn rejoin_resets_ending_and_preserves_history() {
        let registry = MeetingRegistry::new();
        registry.join("r1", &identity("a"));
        registry.join("r1", &identity("b"));
        registry.leave("r1", "a");

        let LeaveOutcome::LastParticipant(_) = registry.leave("r1", "b") else {
            panic!("expected last-participant detection");
        };
        registry.finalize_leave("r1", "b");

        assert_eq!(registry.join("r1", &identity("c")), JoinOutcome::Joined);
        registry
            .with_meeting("r1", |m| {
                assert!(!m.is_ending);
                assert_eq!(m.participants.len(), 1);
                // A, B, and C all remain in history.
                assert_eq!(m.all_participants.len(), 3);
                assert!(m.all_participants.get("a").unwrap().left_at.is_some());
                assert!(m.all_participants.get("c").unwrap().left_at.is_none());
                assert_invariant(m);
            })
            .unwrap();
    }

    #[test]
    fn rejoining_user_gets_fresh_joined_at_and_cleared_left_at() {
        let registry = MeetingRegistry::new();
        registry.join("r1", &identity("a"));
        registry.join("r1", &identity("b"));
        registry.leave("r1", "a");

        let first_joined =
            registry.with_meeting("r1", |m| m.all_participants.get("a").unwrap().joined_at);

        registry.join("r1", &identity("a"));
        registry
            .with_meeting("r1", |m| {
                let history = m.all_participants.get("a").unwrap();
                assert!(history.left_at.is_none());
                assert!(Some(history.joined_at) >= first_joined);
                assert_eq!(m.all_participants.len(), 2);
            })
            .unwrap();
    }

    #[test]
    fn record_chat_appends_only_for_active_meetings() {
        let registry = MeetingRegistry::new();
        let entry = TranscriptEntry {
            user_id: "a".to_string(),
            user_name: "User a".to_string(),
            text: "hello".to_string(),
            sent_at: Utc::now(),
        };

        assert!(!registry.record_chat("r1", entry.clone()));

        registry.join("r1", &identity("a"));
        assert!(registry.record_chat("r1", entry));
        registry
            .with_meeting("r1", |m| assert_eq!(m.chat_log.len(), 1))
            .unwrap();
    }

    #[tokio::test]
    async fn expire_removes_only_empty_ending_meetings() {
        let registry = MeetingRegistry::new();
        registry.join("r1", &identity("a"));

        // Occupied meeting refuses to expire.
        assert!(!registry.expire("r1"));
        assert!(registry.contains("r1"));

        let LeaveOutcome::LastParticipant(_) = registry.leave("r1", "a") else {
            panic!("expected last-participant detection");
        };
        registry.finalize_leave("r1", "a");

        assert!(registry.expire("r1"));
        assert!(!registry.contains("r1"));
    }

    #[tokio::test]
    async fn store_and_cancel_timer() {
        let registry = MeetingRegistry::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });

        registry.store_timer("r1", handle);
        assert!(registry.has_timer("r1"));
        assert!(registry.cancel_timer("r1"));
        assert!(!registry.has_timer("r1"));
        assert!(!registry.cancel_timer("r1"));
    }
}
