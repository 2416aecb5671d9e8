//! Interfaces to the three external planes the engine orchestrates:
//! the room control plane (WebRTC rooms and egress), the ingest platform
//! (RTMP in, HLS out), and the publish service (feed entries).
//!
//! The engine only ever talks to these traits; production adapters and
//! test fakes both live behind them.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{PlaybackId, RoomId, Session};

/// Failure from a collaborator call. The orchestrator wraps these into
/// `SessionError::ExternalService` with origin context at the call site.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// Stop-egress raced with natural completion. The room control plane
    /// reports this as an error but the egress is in the state we wanted;
    /// teardown treats it as success.
    #[error("egress already finished: {0}")]
    EgressAlreadyFinished(String),

    #[error("{0}")]
    Failed(String),
}

impl PlaneError {
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_already_finished(&self) -> bool {
        matches!(self, Self::EgressAlreadyFinished(_))
    }
}

pub type PlaneResult<T> = std::result::Result<T, PlaneError>;

/// Room hosting and media egress.
#[async_trait]
pub trait RoomControlPlane: Send + Sync {
    /// Create (or re-create) the room; idempotent on the plane side.
    async fn create_room(&self, room_id: &RoomId, max_participants: Option<u32>)
        -> PlaneResult<()>;

    async fn delete_room(&self, room_id: &RoomId) -> PlaneResult<()>;

    /// Start composite egress from the room to the given RTMP URL;
    /// returns the plane's egress id.
    async fn start_egress(&self, room_id: &RoomId, rtmp_url: &str) -> PlaneResult<String>;

    /// Stop a running egress. Returns `EgressAlreadyFinished` when the
    /// egress already completed, is ending, or hit its duration limit.
    async fn stop_egress(&self, egress_id: &str) -> PlaneResult<()>;

    /// Push updated session metadata into the room so connected clients
    /// see it without a round trip.
    async fn update_room_metadata(&self, room_id: &RoomId, metadata: &str) -> PlaneResult<()>;
}

/// A live stream provisioned on the ingest platform.
#[derive(Debug, Clone)]
pub struct IngestStream {
    pub stream_id: String,
    pub stream_key: String,
    pub playback_ids: Vec<PlaybackId>,
}

/// Ingest-side stream status as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Idle,
    Disabled,
    Unknown,
}

/// RTMP ingest and HLS delivery.
#[async_trait]
pub trait IngestPlatform: Send + Sync {
    /// Provision a live stream carrying `correlation_token` as its
    /// passthrough, echoed back in webhook events.
    async fn create_stream(&self, correlation_token: &str) -> PlaneResult<IngestStream>;

    async fn delete_stream(&self, stream_id: &str) -> PlaneResult<()>;

    async fn get_stream_status(&self, stream_id: &str) -> PlaneResult<StreamStatus>;

    /// Tell the platform the broadcast is over so it finalizes the asset
    /// immediately instead of waiting out the reconnect window.
    async fn signal_stream_complete(&self, stream_id: &str) -> PlaneResult<()>;

    /// Preview-image URLs derived from a playback id. Synchronous; these
    /// are deterministic URL constructions on the platform's CDN.
    fn animated_url(&self, playback_id: &str) -> String;
    fn thumbnail_url(&self, playback_id: &str) -> String;
    fn storyboard_url(&self, playback_id: &str) -> String;
}

/// Downstream feed publication.
#[async_trait]
pub trait PublishService: Send + Sync {
    /// Announce the session as live; returns the publish id used for
    /// later update/stop calls.
    async fn start(&self, session: &Session) -> PlaneResult<String>;

    async fn stop(&self, publish_id: &str) -> PlaneResult<()>;

    /// Sync changed session metadata to the published entry.
    async fn update(&self, publish_id: &str, session: &Session) -> PlaneResult<()>;
}
