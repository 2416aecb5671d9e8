use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::SessionRuntime;

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("se_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room ID type - the identifier the room-hosting collaborator uses
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new() -> Self {
        Self(format!("ro_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle states.
///
/// State flow with triggers:
/// - Idle (session created) -> Ready (host joined the room) | Cancelled
/// - Ready -> Publishing (start-live triggered) | Cancelled | Idle
/// - Publishing -> Live (confirmed by the ingest platform) | Cancelled | Ready | Aborted
/// - Live -> Ending (end-live triggered) | Aborted
/// - Ending -> Stopped (ingest platform confirmed the stream went idle)
/// - Aborted -> Stopped | Cancelled
/// - Cancelled/Stopped are terminal
///
/// `Scheduled` is reserved for future scheduling support and has no
/// inbound transition today.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Scheduled,
    Ready,
    Publishing,
    Live,
    Ending,
    Aborted,
    Cancelled,
    Stopped,
}

impl SessionStatus {
    /// States considered "active" for a session: the session is alive and
    /// holds the one-active-session-per-channel slot.
    pub fn active_states() -> &'static [SessionStatus] {
        &[
            SessionStatus::Idle,
            SessionStatus::Ready,
            SessionStatus::Publishing,
            SessionStatus::Live,
            SessionStatus::Ending,
        ]
    }

    pub fn is_active(&self) -> bool {
        Self::active_states().contains(self)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Ready => "ready",
            SessionStatus::Publishing => "publishing",
            SessionStatus::Live => "live",
            SessionStatus::Ending => "ending",
            SessionStatus::Aborted => "aborted",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// A playback id issued by the ingest platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackId {
    pub id: String,
    pub policy: String,
}

/// The session document: one live broadcast attempt, tracked end-to-end
/// from creation to a terminal outcome. Never physically deleted; it
/// reaches a terminal status and remains as an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub room_id: RoomId,
    pub channel_id: ChannelId,
    pub user_id: UserId,

    // Descriptive fields, copied from the owning channel at creation
    // unless overridden
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub lang: Option<String>,
    pub category_ids: Option<Vec<String>>,

    pub status: SessionStatus,
    pub max_participants: Option<u32>,

    /// Provider-specific integration state
    pub runtime: SessionRuntime,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once, on the first transition into Live
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, on the first transition into a terminal-bound state
    pub stopped_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency version, starting at 1 and bumped by
    /// exactly 1 on every successful write. The sole concurrency-control
    /// primitive; there is no external lock service.
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_version() -> u64 {
    1
}

impl Session {
    /// The correlation token embedded in outbound collaborator calls and
    /// echoed back in inbound webhook events.
    pub fn correlation_token(&self) -> String {
        format!("{}|{}|{}", self.room_id, self.channel_id, self.session_id)
    }
}

/// Channel collaborator record. Read-only from this engine's perspective
/// except for the best-effort metadata sync on session update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub lang: Option<String>,
    pub category_ids: Option<Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn utc_now() -> DateTime<Utc> {
    Utc::now()
}
