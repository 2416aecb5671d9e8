//! Session record operations: create, lookups, listing, metadata update,
//! and recreation of a fresh session for a room whose previous session
//! reached a terminal state.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::engine::SessionEngine;
use crate::errors::{Result, SessionError};
use crate::runtime::SessionRuntime;
use crate::store::{ListFilter, SessionLookup, SessionPatch};
use crate::types::{
    utc_now, Channel, ChannelId, RoomId, Session, SessionId, SessionStatus, UserId,
};

#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub lang: Option<String>,
    pub category_ids: Option<Vec<String>>,
    pub max_participants: Option<u32>,
    /// End the channel's existing active session instead of failing with
    /// a conflict.
    pub end_existing: bool,
}

impl CreateSessionParams {
    pub fn new(channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            channel_id,
            user_id,
            title: None,
            location: None,
            description: None,
            cover: None,
            lang: None,
            category_ids: None,
            max_participants: None,
            end_existing: false,
        }
    }
}

/// Metadata update; only provided fields are written.
#[derive(Debug, Clone, Default)]
pub struct UpdateSessionParams {
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub lang: Option<String>,
    pub category_ids: Option<Vec<String>>,
    pub max_participants: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSessionsParams {
    pub channel_id: Option<ChannelId>,
    pub user_id: Option<UserId>,
    pub statuses: Option<Vec<SessionStatus>>,
    pub cursor: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    /// Present only when more rows exist past this page.
    pub next_cursor: Option<String>,
}

fn encode_cursor(session: &Session) -> String {
    format!(
        "{}|{}",
        session.created_at.timestamp_millis(),
        session.session_id
    )
}

/// Parse a `"<created_at_ms>|<session_id>"` cursor. Invalid cursors are
/// ignored by the caller (start from the beginning), not rejected.
fn decode_cursor(cursor: &str) -> Option<(DateTime<Utc>, SessionId)> {
    let (ms_part, id_part) = cursor.split_once('|')?;
    let ms: i64 = ms_part.parse().ok()?;
    let created_at = Utc.timestamp_millis_opt(ms).single()?;
    if id_part.is_empty() {
        return None;
    }
    Some((created_at, SessionId(id_part.to_string())))
}

impl SessionEngine {
    /// Create a new session in `Idle` for a channel the user owns.
    ///
    /// At most one active session per channel: an existing active session
    /// is a conflict unless `end_existing` was requested, in which case
    /// it is ended first. Insert races with concurrent creators surface
    /// as the same conflict.
    pub async fn create_session(self: &Arc<Self>, params: CreateSessionParams) -> Result<Session> {
        let channel = self
            .store
            .find_channel(&params.channel_id)
            .await?
            .filter(|c| c.user_id == params.user_id)
            .ok_or_else(|| {
                SessionError::not_found(format!("channel not found: {}", params.channel_id))
            })?;

        if let Some(existing) = self
            .store
            .find(&SessionLookup::ActiveByChannel(params.channel_id.clone()))
            .await?
        {
            if params.end_existing {
                info!(
                    session_id = %existing.session_id,
                    channel_id = %params.channel_id,
                    "ending existing session before creating a new one"
                );
                self.end_session(&existing.session_id).await?;
            } else {
                return Err(SessionError::conflict(format!(
                    "active session already exists for channel {}: {}",
                    params.channel_id, existing.session_id
                )));
            }
        }

        let now = utc_now();
        let session = Session {
            session_id: SessionId::new(),
            room_id: RoomId::new(),
            channel_id: params.channel_id.clone(),
            user_id: params.user_id,
            title: params.title.clone().or_else(|| channel.title.clone()),
            location: params.location.or_else(|| channel.location.clone()),
            description: params
                .description
                .clone()
                .or_else(|| channel.description.clone()),
            cover: params.cover.clone().or_else(|| channel.cover.clone()),
            lang: params.lang.or_else(|| channel.lang.clone()),
            category_ids: params
                .category_ids
                .or_else(|| channel.category_ids.clone()),
            status: SessionStatus::Idle,
            max_participants: params.max_participants,
            runtime: SessionRuntime::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
            version: 1,
        };

        debug!(session_id = %session.session_id, channel_id = %session.channel_id, "creating session");
        self.store.insert(&session).await.map_err(|e| match e {
            SessionError::Conflict(_) => SessionError::conflict(format!(
                "active session already exists for channel {}",
                params.channel_id
            )),
            other => other,
        })?;

        // Explicitly-provided title/description/cover become the channel's
        // new defaults; best-effort.
        let mut channel_sync = channel.clone();
        let mut channel_changed = false;
        for (provided, slot) in [
            (&params.title, &mut channel_sync.title),
            (&params.description, &mut channel_sync.description),
            (&params.cover, &mut channel_sync.cover),
        ] {
            if provided.is_some() && provided != slot {
                *slot = provided.clone();
                channel_changed = true;
            }
        }
        if channel_changed {
            channel_sync.updated_at = now;
            if let Err(e) = self.store.save_channel(&channel_sync).await {
                warn!(channel_id = %channel_sync.channel_id, error = %e, "channel metadata sync failed");
            }
        }

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &SessionId) -> Result<Session> {
        self.store
            .require(&SessionLookup::ById(session_id.clone()))
            .await
    }

    /// Active (non-terminal) session for a room.
    pub async fn get_active_session_by_room(&self, room_id: &RoomId) -> Result<Session> {
        self.store
            .find(&SessionLookup::ActiveByRoom(room_id.clone()))
            .await?
            .ok_or_else(|| {
                SessionError::not_found(format!("no active session found for room: {room_id}"))
            })
    }

    /// Most recent session for a room regardless of status.
    pub async fn get_last_session_by_room(&self, room_id: &RoomId) -> Result<Session> {
        self.store
            .find(&SessionLookup::LastByRoom(room_id.clone()))
            .await?
            .ok_or_else(|| SessionError::not_found(format!("no session found for room: {room_id}")))
    }

    pub async fn get_active_session_by_channel(&self, channel_id: &ChannelId) -> Result<Session> {
        self.store
            .find(&SessionLookup::ActiveByChannel(channel_id.clone()))
            .await?
            .ok_or_else(|| {
                SessionError::not_found(format!(
                    "no active session found for channel: {channel_id}"
                ))
            })
    }

    /// Paginated listing ordered by (created_at desc, session_id desc).
    pub async fn list_sessions(&self, params: ListSessionsParams) -> Result<SessionPage> {
        let page_size = params
            .page_size
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size);

        let before = match params.cursor.as_deref() {
            Some(cursor) => {
                let parsed = decode_cursor(cursor);
                if parsed.is_none() {
                    warn!(cursor, "invalid cursor, listing from the beginning");
                }
                parsed
            }
            None => None,
        };

        let filter = ListFilter {
            channel_id: params.channel_id,
            user_id: params.user_id,
            statuses: params.statuses,
            before,
        };

        // Fetch one extra row to detect whether a next page exists.
        let mut sessions = self.store.list(&filter, page_size + 1).await?;
        let next_cursor = if sessions.len() > page_size {
            sessions.truncate(page_size);
            sessions.last().map(encode_cursor)
        } else {
            None
        };

        Ok(SessionPage {
            sessions,
            next_cursor,
        })
    }

    /// Apply a partial metadata update.
    ///
    /// Title/description/cover changes are best-effort-synced to the
    /// owning channel and, when the session carries a publish id, to the
    /// publish service; sync failures are logged, never propagated.
    pub async fn update_session(
        &self,
        session_id: &SessionId,
        params: UpdateSessionParams,
    ) -> Result<Session> {
        let mut session = self.get_session(session_id).await?;

        let mut patch = SessionPatch::new();
        let mut sync_needed = false;

        if let Some(title) = params.title {
            if session.title.as_ref() != Some(&title) {
                patch.title = Some(title);
                sync_needed = true;
            }
        }
        if let Some(description) = params.description {
            if session.description.as_ref() != Some(&description) {
                patch.description = Some(description);
                sync_needed = true;
            }
        }
        if let Some(cover) = params.cover {
            if session.cover.as_ref() != Some(&cover) {
                patch.cover = Some(cover);
                sync_needed = true;
            }
        }
        if let Some(location) = params.location {
            if session.location.as_ref() != Some(&location) {
                patch.location = Some(location);
            }
        }
        if let Some(lang) = params.lang {
            if session.lang.as_ref() != Some(&lang) {
                patch.lang = Some(lang);
            }
        }
        if let Some(ids) = params.category_ids {
            if session.category_ids.as_ref() != Some(&ids) {
                patch.category_ids = Some(ids);
            }
        }
        if let Some(max) = params.max_participants {
            if session.max_participants != Some(max) {
                patch.max_participants = Some(max);
            }
        }

        let changed = patch.title.is_some()
            || patch.description.is_some()
            || patch.cover.is_some()
            || patch.location.is_some()
            || patch.lang.is_some()
            || patch.category_ids.is_some()
            || patch.max_participants.is_some();
        if !changed {
            return Ok(session);
        }

        patch.updated_at = Some(utc_now());
        self.store.partial_update(&mut session, patch, 2).await?;

        if sync_needed {
            self.sync_channel_metadata(&session).await;
            if session.runtime.publish_id.is_some() {
                self.sync_published_metadata(&session).await;
            }
        }

        Ok(session)
    }

    /// Create a fresh `Ready` session for a room whose previous session
    /// reached a terminal state, reusing the room id and metadata.
    ///
    /// A concurrent recreation for the same room is tolerated: on an
    /// insert conflict the already-created active session is returned.
    pub async fn recreate_session_from_terminal(&self, terminal: &Session) -> Result<Session> {
        if !crate::state::is_terminal(terminal.status) {
            return Err(SessionError::invalid_request(format!(
                "can only recreate from a terminal session, got: {}",
                terminal.status
            )));
        }
        let _channel: Channel = self
            .store
            .find_channel(&terminal.channel_id)
            .await?
            .ok_or_else(|| {
                SessionError::not_found(format!("channel not found: {}", terminal.channel_id))
            })?;

        let now = utc_now();
        let session = Session {
            session_id: SessionId::new(),
            room_id: terminal.room_id.clone(),
            channel_id: terminal.channel_id.clone(),
            user_id: terminal.user_id.clone(),
            title: terminal.title.clone(),
            location: terminal.location.clone(),
            description: terminal.description.clone(),
            cover: terminal.cover.clone(),
            lang: terminal.lang.clone(),
            category_ids: terminal.category_ids.clone(),
            status: SessionStatus::Ready,
            max_participants: terminal.max_participants,
            runtime: SessionRuntime::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
            version: 1,
        };

        // Make sure the collaborator room still exists; it may have been
        // torn down since the previous session ended.
        if let Err(e) = self
            .rooms
            .create_room(&terminal.room_id, terminal.max_participants)
            .await
        {
            warn!(room_id = %terminal.room_id, error = %e, "room create failed, continuing");
        }

        match self.store.insert(&session).await {
            Ok(()) => {
                info!(
                    session_id = %session.session_id,
                    room_id = %session.room_id,
                    previous = %terminal.session_id,
                    "recreated ready session"
                );
                Ok(session)
            }
            Err(SessionError::Conflict(_)) => {
                // Lost the recreation race; the winner's session is the
                // one to use.
                info!(room_id = %terminal.room_id, "session already recreated, returning existing");
                self.get_active_session_by_room(&terminal.room_id).await
            }
            Err(other) => Err(other),
        }
    }

    /// Push title/description/cover back to the owning channel record.
    pub(crate) async fn sync_channel_metadata(&self, session: &Session) {
        let channel = match self.store.find_channel(&session.channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                warn!(channel_id = %session.channel_id, "channel not found, skipping sync");
                return;
            }
            Err(e) => {
                warn!(channel_id = %session.channel_id, error = %e, "channel lookup failed, skipping sync");
                return;
            }
        };

        let mut channel = channel;
        channel.title = session.title.clone();
        channel.description = session.description.clone();
        channel.cover = session.cover.clone();
        channel.updated_at = utc_now();
        if let Err(e) = self.store.save_channel(&channel).await {
            warn!(channel_id = %channel.channel_id, error = %e, "channel metadata sync failed");
        } else {
            debug!(
                session_id = %session.session_id,
                channel_id = %channel.channel_id,
                "session metadata synced to channel"
            );
        }
    }

    /// Push the session's current metadata to the publish service.
    pub(crate) async fn sync_published_metadata(&self, session: &Session) {
        let Some(publish_id) = session.runtime.publish_id.as_deref() else {
            return;
        };
        match self.publisher.update(publish_id, session).await {
            Ok(()) => {
                info!(session_id = %session.session_id, publish_id, "published metadata updated")
            }
            Err(e) => {
                warn!(session_id = %session.session_id, publish_id, error = %e, "publish metadata sync failed")
            }
        }
    }
}
