//! In-memory document store on DashMap.
//!
//! The default backend for tests and single-node deployments. Uniqueness
//! constraints (one active session per channel and per room) are enforced
//! under a shard-wide write mutex so insert checks stay atomic.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::errors::{Result, SessionError};
use crate::types::{Channel, ChannelId, Session, SessionId};

use super::{DocumentStore, ListFilter, SessionLookup, SessionPatch};

pub struct MemoryStore {
    sessions: DashMap<SessionId, Session>,
    channels: DashMap<ChannelId, Channel>,
    /// Serializes insert-time uniqueness checks against concurrent inserts.
    insert_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            channels: DashMap::new(),
            insert_lock: Mutex::new(()),
        }
    }

    fn matches_filter(session: &Session, filter: &ListFilter) -> bool {
        if let Some(channel_id) = &filter.channel_id {
            if &session.channel_id != channel_id {
                return false;
            }
        }
        if let Some(user_id) = &filter.user_id {
            if &session.user_id != user_id {
                return false;
            }
        }
        if let Some(statuses) = &filter.statuses {
            if !statuses.contains(&session.status) {
                return false;
            }
        }
        if let Some((created_at, session_id)) = &filter.before {
            // Strictly after the cursor position in
            // (created_at desc, session_id desc) order.
            let after = session.created_at < *created_at
                || (session.created_at == *created_at && session.session_id < *session_id);
            if !after {
                return false;
            }
        }
        true
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_session(&self, lookup: &SessionLookup) -> Result<Option<Session>> {
        let found = match lookup {
            SessionLookup::ById(id) => self.sessions.get(id).map(|s| s.clone()),
            SessionLookup::ActiveByRoom(room_id) => self
                .sessions
                .iter()
                .find(|s| &s.room_id == room_id && s.status.is_active())
                .map(|s| s.clone()),
            SessionLookup::LastByRoom(room_id) => self
                .sessions
                .iter()
                .filter(|s| &s.room_id == room_id)
                .map(|s| s.clone())
                .max_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.session_id.cmp(&b.session_id))
                }),
            SessionLookup::ActiveByChannel(channel_id) => self
                .sessions
                .iter()
                .find(|s| &s.channel_id == channel_id && s.status.is_active())
                .map(|s| s.clone()),
            SessionLookup::ByStreamId(stream_id) => self
                .sessions
                .iter()
                .find(|s| s.runtime.stream_id() == Some(stream_id.as_str()))
                .map(|s| s.clone()),
        };
        Ok(found)
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let _guard = self.insert_lock.lock().await;

        if self.sessions.contains_key(&session.session_id) {
            return Err(SessionError::conflict(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        if session.status.is_active() {
            let clash = self.sessions.iter().any(|s| {
                s.status.is_active()
                    && (s.channel_id == session.channel_id || s.room_id == session.room_id)
            });
            if clash {
                return Err(SessionError::conflict(format!(
                    "channel {} already has an active session",
                    session.channel_id
                )));
            }
        }

        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn cas_update(
        &self,
        id: &SessionId,
        expected_version: u64,
        patch: &SessionPatch,
    ) -> Result<bool> {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                if entry.version != expected_version {
                    return Ok(false);
                }
                patch.apply_to(&mut entry);
                entry.version = expected_version + 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_sessions(&self, filter: &ListFilter, limit: usize) -> Result<Vec<Session>> {
        let mut rows: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| Self::matches_filter(s, filter))
            .map(|s| s.clone())
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_channel(&self, channel_id: &ChannelId) -> Result<Option<Channel>> {
        Ok(self.channels.get(channel_id).map(|c| c.clone()))
    }

    async fn save_channel(&self, channel: &Channel) -> Result<()> {
        self.channels.insert(channel.channel_id.clone(), channel.clone());
        Ok(())
    }
}
