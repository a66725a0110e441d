//! In-memory presence directory: one record per online user, created on
//! `user_online`, mutated by status changes, deleted on disconnect. The
//! org-scoped online list is a derived read, never stored separately.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::auth::Identity;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
    pub org_id: Option<String>,
    pub status: String,
    pub custom_status: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub connection_id: String,
}

pub struct PresenceDirectory {
    inner: DashMap<String, PresenceRecord>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Insert or overwrite the user's record. A reconnect simply replaces
    /// the old record with the new connection.
    pub fn set_online(
        &self,
        identity: &Identity,
        connection_id: &str,
        name: Option<String>,
        photo: Option<String>,
        org_id: Option<String>,
    ) -> PresenceRecord {
        let record = PresenceRecord {
            user_id: identity.user_id.clone(),
            name: name.unwrap_or_else(|| identity.name.clone()),
            email: identity.email.clone(),
            photo,
            org_id,
            status: "online".to_string(),
            custom_status: None,
            last_seen: Utc::now(),
            connection_id: connection_id.to_string(),
        };
        self.inner
            .insert(identity.user_id.clone(), record.clone());
        record
    }

    /// No-op when the user has no record (never came online).
    pub fn update_status(
        &self,
        user_id: &str,
        status: &str,
        custom_status: Option<String>,
    ) -> Option<PresenceRecord> {
        let mut record = self.inner.get_mut(user_id)?;
        record.status = status.to_string();
        record.custom_status = custom_status;
        record.last_seen = Utc::now();
        Some(record.clone())
    }

    /// Update the record's org. Room membership is the caller's concern.
    pub fn set_org(&self, user_id: &str, org_id: Option<String>) {
        if let Some(mut record) = self.inner.get_mut(user_id) {
            record.org_id = org_id;
        }
    }

    /// Remove the user's record, but only if it still belongs to the given
    /// connection; a reconnect may already have replaced it. Returns the
    /// removed record with `last_seen` stamped to now.
    pub fn remove(&self, user_id: &str, connection_id: &str) -> Option<PresenceRecord> {
        let (_, mut record) = self
            .inner
            .remove_if(user_id, |_, r| r.connection_id == connection_id)?;
        record.last_seen = Utc::now();
        Some(record)
    }

    /// Derived view: everyone currently online in an organization.
    pub fn online_in_org(&self, org_id: &str) -> Vec<PresenceRecord> {
        self.inner
            .iter()
            .filter(|e| e.org_id.as_deref() == Some(org_id))
            .map(|e| e.clone())
            .collect()
    }

    /// Resolve a user to their connection if online; absence means offline.
    pub fn resolve_connection(&self, user_id: &str) -> Option<String> {
        self.inner.get(user_id).map(|r| r.connection_id.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
