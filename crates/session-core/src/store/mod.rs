//! Document store seam and the version-checked update adapter.
//!
//! All session mutation goes through [`SessionStore::partial_update`],
//! which wraps the store's compare-and-swap primitive with the two update
//! modes: zero-retry (mandatory for `status` writes) and bounded-retry
//! (non-status fields only).

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{Result, SessionError};
use crate::runtime::SessionRuntime;
use crate::types::{Channel, ChannelId, RoomId, Session, SessionId, SessionStatus};

pub use memory::MemoryStore;

/// Retry ceiling for bounded-retry updates.
pub const MAX_RETRY_CEILING: u32 = 10;

/// Lookup predicates understood by the store.
#[derive(Debug, Clone)]
pub enum SessionLookup {
    ById(SessionId),
    /// Room lookup filtered to non-terminal statuses
    ActiveByRoom(RoomId),
    /// Most recent session for a room regardless of status
    LastByRoom(RoomId),
    ActiveByChannel(ChannelId),
    /// Lookup by the ingest platform's stream identifier stored in
    /// `runtime.stream.stream_id`
    ByStreamId(String),
}

/// Filter for session listing. `before` is the exclusive cursor position:
/// rows strictly after it in (created_at desc, session_id desc) order.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub channel_id: Option<ChannelId>,
    pub user_id: Option<crate::types::UserId>,
    pub statuses: Option<Vec<SessionStatus>>,
    pub before: Option<(DateTime<Utc>, SessionId)>,
}

/// A partial write against a session document. Unset fields are left
/// untouched by the store.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub lang: Option<String>,
    pub category_ids: Option<Vec<String>>,
    pub max_participants: Option<u32>,
    pub runtime: Option<SessionRuntime>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn runtime(mut self, runtime: SessionRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn touches_status(&self) -> bool {
        self.status.is_some()
    }

    /// Apply the patch to an in-memory copy of the document. The store's
    /// CAS implementation applies exactly the same field set.
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(title) = &self.title {
            session.title = Some(title.clone());
        }
        if let Some(location) = &self.location {
            session.location = Some(location.clone());
        }
        if let Some(description) = &self.description {
            session.description = Some(description.clone());
        }
        if let Some(cover) = &self.cover {
            session.cover = Some(cover.clone());
        }
        if let Some(lang) = &self.lang {
            session.lang = Some(lang.clone());
        }
        if let Some(ids) = &self.category_ids {
            session.category_ids = Some(ids.clone());
        }
        if let Some(max) = self.max_participants {
            session.max_participants = Some(max);
        }
        if let Some(runtime) = &self.runtime {
            session.runtime = runtime.clone();
        }
        if let Some(at) = self.started_at {
            session.started_at = Some(at);
        }
        if let Some(at) = self.stopped_at {
            session.stopped_at = Some(at);
        }
        if let Some(at) = self.updated_at {
            session.updated_at = at;
        }
    }
}

/// Narrow persistence interface implemented by the backing document
/// store. `cas_update` must be atomic: it applies the patch and bumps
/// `version` by 1 only when the stored version equals `expected_version`,
/// returning false (and mutating nothing) otherwise.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_session(&self, lookup: &SessionLookup) -> Result<Option<Session>>;

    /// Insert a new session. Fails with `Conflict` when the document
    /// violates a uniqueness constraint (duplicate session id, or a
    /// second active session for the same channel or room).
    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn cas_update(
        &self,
        id: &SessionId,
        expected_version: u64,
        patch: &SessionPatch,
    ) -> Result<bool>;

    /// Sessions matching `filter`, ordered by (created_at desc,
    /// session_id desc), at most `limit` rows.
    async fn list_sessions(&self, filter: &ListFilter, limit: usize) -> Result<Vec<Session>>;

    async fn find_channel(&self, channel_id: &ChannelId) -> Result<Option<Channel>>;

    async fn save_channel(&self, channel: &Channel) -> Result<()>;
}

/// Version-checked store adapter.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn DocumentStore>,
}

impl SessionStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self { inner }
    }

    pub fn backing(&self) -> &Arc<dyn DocumentStore> {
        &self.inner
    }

    pub async fn find(&self, lookup: &SessionLookup) -> Result<Option<Session>> {
        self.inner.find_session(lookup).await
    }

    /// Find a session, failing with `NotFound` when absent.
    pub async fn require(&self, lookup: &SessionLookup) -> Result<Session> {
        self.inner
            .find_session(lookup)
            .await?
            .ok_or_else(|| SessionError::not_found(format!("session not found: {lookup:?}")))
    }

    pub async fn insert(&self, session: &Session) -> Result<()> {
        self.inner.insert_session(session).await
    }

    pub async fn list(&self, filter: &ListFilter, limit: usize) -> Result<Vec<Session>> {
        self.inner.list_sessions(filter, limit).await
    }

    pub async fn find_channel(&self, channel_id: &ChannelId) -> Result<Option<Channel>> {
        self.inner.find_channel(channel_id).await
    }

    pub async fn save_channel(&self, channel: &Channel) -> Result<()> {
        self.inner.save_channel(channel).await
    }

    /// Atomically update selected session fields with optimistic locking.
    ///
    /// `max_retry_on_conflicts` = 0 performs exactly one CAS attempt and
    /// surfaces a miss as `VersionConflict`. A non-zero ceiling (at most
    /// [`MAX_RETRY_CEILING`]) re-reads the document on each miss and
    /// re-applies the same field values. Combining retries with a
    /// `status` write, or exceeding the ceiling, is rejected before any
    /// I/O: silently retrying a status transition would apply a stale
    /// decision on top of state the caller never observed.
    ///
    /// On success the caller's copy is updated in place, including the
    /// bumped version.
    pub async fn partial_update(
        &self,
        session: &mut Session,
        patch: SessionPatch,
        max_retry_on_conflicts: u32,
    ) -> Result<()> {
        if patch.touches_status() && max_retry_on_conflicts > 0 {
            return Err(SessionError::invalid_request(
                "retries not allowed when updating status",
            ));
        }
        if max_retry_on_conflicts > MAX_RETRY_CEILING {
            return Err(SessionError::invalid_request(format!(
                "max_retry_on_conflicts must be between 0 and {MAX_RETRY_CEILING}"
            )));
        }

        let max_attempts = max_retry_on_conflicts + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let expected = session.version;

            if self
                .inner
                .cas_update(&session.session_id, expected, &patch)
                .await?
            {
                patch.apply_to(session);
                session.version = expected + 1;
                debug!(
                    session_id = %session.session_id,
                    version = session.version,
                    "session partially updated"
                );
                return Ok(());
            }

            if attempts >= max_attempts {
                return Err(SessionError::version_conflict(format!(
                    "session {} expected version {expected}",
                    session.session_id
                )));
            }

            // Conflict with retries remaining: refresh and re-apply the
            // same field values against the new version.
            let fresh = self
                .inner
                .find_session(&SessionLookup::ById(session.session_id.clone()))
                .await?
                .ok_or_else(|| {
                    SessionError::version_conflict(format!(
                        "session {} disappeared during update",
                        session.session_id
                    ))
                })?;
            debug!(
                session_id = %session.session_id,
                refreshed_version = fresh.version,
                attempt = attempts,
                "version conflict, retrying"
            );
            *session = fresh;
        }
    }
}
