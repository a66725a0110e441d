//! Interfaces to the platform services the coordinator calls out to:
//! meeting metadata, report creation, durable notifications, and the
//! channel-access predicates. The coordinator never owns any of this data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollabError {
    /// Unique-constraint style conflict, e.g. a report that already exists.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Durable meeting metadata owned by the platform API. Rooms without a
/// record are ad-hoc and get no report or notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingMeta {
    pub meeting_id: String,
    pub room_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub org_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Report {
    pub id: String,
}

/// A member allowed to see a channel, as resolved by the platform API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMember {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

/// One row of the authoritative participant history, as it goes into a
/// report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParticipant {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// A meeting-chat message captured for the report transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Everything the coordinator assembles for report creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInput {
    pub room_id: String,
    pub meeting_id: String,
    pub participants: Vec<ReportParticipant>,
    pub transcript: Vec<TranscriptEntry>,
    pub duration_secs: i64,
}

/// A durable notification row; delivered at-least-once by the platform API,
/// independent of the fire-and-forget real-time push.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub org_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: String,
}

/// External collaborators consumed by the coordinator.
#[async_trait]
pub trait Collaborators: Send + Sync {
    async fn lookup_meeting_by_room(
        &self,
        room_id: &str,
    ) -> Result<Option<MeetingMeta>, CollabError>;

    async fn report_exists(&self, room_id: &str) -> Result<bool, CollabError>;

    async fn create_report(&self, input: &ReportInput) -> Result<Report, CollabError>;

    async fn delete_meeting(&self, room_id: &str) -> Result<(), CollabError>;

    async fn notify(&self, notification: &Notification) -> Result<(), CollabError>;

    async fn has_channel_access(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<bool, CollabError>;

    async fn members_with_channel_access(
        &self,
        org_id: &str,
        channel_id: &str,
    ) -> Result<Vec<ChannelMember>, CollabError>;
}

// ---------------------------------------------------------------------------
// HTTP-backed implementation against the internal platform API
// ---------------------------------------------------------------------------

pub struct HttpCollaborators {
    base_url: String,
    service_token: String,
    http: reqwest::Client,
}

impl HttpCollaborators {
    pub fn new(base_url: &str, service_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token: service_token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.service_token)
    }
}

fn transport_err(e: reqwest::Error) -> CollabError {
    CollabError::Unavailable(e.to_string())
}

#[async_trait]
impl Collaborators for HttpCollaborators {
    async fn lookup_meeting_by_room(
        &self,
        room_id: &str,
    ) -> Result<Option<MeetingMeta>, CollabError> {
        let url = self.url(&format!("/internal/meetings/by-room/{room_id}"));
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(transport_err)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(transport_err)?;
        let meta = resp.json::<MeetingMeta>().await.map_err(transport_err)?;
        Ok(Some(meta))
    }

    async fn report_exists(&self, room_id: &str) -> Result<bool, CollabError> {
        #[derive(Deserialize)]
        struct Exists {
            exists: bool,
        }
        let url = self.url(&format!("/internal/reports/by-room/{room_id}/exists"));
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;
        Ok(resp.json::<Exists>().await.map_err(transport_err)?.exists)
    }

    async fn create_report(&self, input: &ReportInput) -> Result<Report, CollabError> {
        let url = self.url("/internal/reports");
        let resp = self
            .authed(self.http.post(&url))
            .json(input)
            .send()
            .await
            .map_err(transport_err)?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(CollabError::Conflict(format!(
                "report for room {} already exists",
                input.room_id
            )));
        }
        let resp = resp.error_for_status().map_err(transport_err)?;
        resp.json::<Report>().await.map_err(transport_err)
    }

    async fn delete_meeting(&self, room_id: &str) -> Result<(), CollabError> {
        let url = self.url(&format!("/internal/meetings/by-room/{room_id}"));
        self.authed(self.http.delete(&url))
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;
        Ok(())
    }

    async fn notify(&self, notification: &Notification) -> Result<(), CollabError> {
        let url = self.url("/internal/notifications");
        self.authed(self.http.post(&url))
            .json(notification)
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;
        Ok(())
    }

    async fn has_channel_access(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<bool, CollabError> {
        #[derive(Deserialize)]
        struct Access {
            allowed: bool,
        }
        let url = self.url(&format!("/internal/channels/{channel_id}/access/{user_id}"));
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;
        Ok(resp.json::<Access>().await.map_err(transport_err)?.allowed)
    }

    async fn members_with_channel_access(
        &self,
        org_id: &str,
        channel_id: &str,
    ) -> Result<Vec<ChannelMember>, CollabError> {
        let url = self.url(&format!(
            "/internal/orgs/{org_id}/channels/{channel_id}/members"
        ));
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;
        resp.json::<Vec<ChannelMember>>().await.map_err(transport_err)
    }
}

// ---------------------------------------------------------------------------
// Recording mock for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// In-memory `Collaborators` that records every call.
    #[derive(Default)]
    pub struct MockCollaborators {
        pub meetings: Mutex<HashMap<String, MeetingMeta>>,
        pub existing_reports: Mutex<HashSet<String>>,
        pub created_reports: Mutex<Vec<ReportInput>>,
        pub deleted_meetings: Mutex<Vec<String>>,
        pub notifications: Mutex<Vec<Notification>>,
        pub members: Mutex<Vec<ChannelMember>>,
        pub denied_users: Mutex<HashSet<String>>,
        /// When set, `create_report` fails with `Conflict`.
        pub conflict_on_create: Mutex<bool>,
    }

    impl MockCollaborators {
        pub fn with_meeting(self, meta: MeetingMeta) -> Self {
            self.meetings.lock().insert(meta.room_id.clone(), meta);
            self
        }

        pub fn with_members(self, members: Vec<ChannelMember>) -> Self {
            *self.members.lock() = members;
            self
        }
    }

    #[async_trait]
    impl Collaborators for MockCollaborators {
        async fn lookup_meeting_by_room(
            &self,
            room_id: &str,
        ) -> Result<Option<MeetingMeta>, CollabError> {
            Ok(self.meetings.lock().get(room_id).cloned())
        }

        async fn report_exists(&self, room_id: &str) -> Result<bool, CollabError> {
            if self.existing_reports.lock().contains(room_id) {
                return Ok(true);
            }
            Ok(self
                .created_reports
                .lock()
                .iter()
                .any(|r| r.room_id == room_id))
        }

        async fn create_report(&self, input: &ReportInput) -> Result<Report, CollabError> {
            if *self.conflict_on_create.lock() {
                return Err(CollabError::Conflict("duplicate report".to_string()));
            }
            self.created_reports.lock().push(input.clone());
            Ok(Report {
                id: format!("rpt_{}", input.room_id),
            })
        }

        async fn delete_meeting(&self, room_id: &str) -> Result<(), CollabError> {
            self.deleted_meetings.lock().push(room_id.to_string());
            Ok(())
        }

        async fn notify(&self, notification: &Notification) -> Result<(), CollabError> {
            self.notifications.lock().push(notification.clone());
            Ok(())
        }

        async fn has_channel_access(
            &self,
            user_id: &str,
            _channel_id: &str,
        ) -> Result<bool, CollabError> {
            Ok(!self.denied_users.lock().contains(user_id))
        }

        async fn members_with_channel_access(
            &self,
            _org_id: &str,
            _channel_id: &str,
        ) -> Result<Vec<ChannelMember>, CollabError> {
            Ok(self.members.lock().clone())
        }
    }
}
