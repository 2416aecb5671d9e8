//! Provider-specific runtime state carried inside the session document.
//!
//! Modelled as a tagged struct with optional sub-structs per integration;
//! absence is `None`, not a missing key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PlaybackId;

/// Room-egress integration state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRuntime {
    pub egress_id: Option<String>,
}

/// Ingest-platform integration state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRuntime {
    pub stream_id: Option<String>,
    pub stream_key: Option<String>,
    pub rtmp_url: Option<String>,
    pub playback_ids: Option<Vec<PlaybackId>>,
    /// Active asset id once the platform starts recording. The asset's
    /// playback id replaces the stream's for `live_playback_url`, which
    /// enables full-timeline scrubbing.
    pub active_asset_id: Option<String>,
}

/// Pending host-cleanup task state.
///
/// Set when the owning host disconnects from the room; cleared (and the
/// task cancelled by handle) if they return before the delay elapses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCleanup {
    pub task_id: Option<String>,
    pub host_left_at: Option<DateTime<Utc>>,
}

/// Transient integration state for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRuntime {
    pub egress: Option<EgressRuntime>,
    pub stream: Option<StreamRuntime>,
    pub host_cleanup: Option<HostCleanup>,

    /// Live HLS playback URL
    pub live_playback_url: Option<String>,
    /// On-demand playback URL, available after the stream ends
    pub vod_playback_url: Option<String>,
    pub animated_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Storyboard VTT URL for progress-bar preview
    pub storyboard_url: Option<String>,

    /// Correlation id issued by the publish service on first start
    pub publish_id: Option<String>,
}

impl SessionRuntime {
    pub fn egress_id(&self) -> Option<&str> {
        self.egress.as_ref()?.egress_id.as_deref()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream.as_ref()?.stream_id.as_deref()
    }

    pub fn stream_key(&self) -> Option<&str> {
        self.stream.as_ref()?.stream_key.as_deref()
    }

    pub fn rtmp_url(&self) -> Option<&str> {
        self.stream.as_ref()?.rtmp_url.as_deref()
    }

    /// Full ingest URL including the stream key, or None if either part
    /// is missing.
    pub fn rtmp_ingest_url(&self) -> Option<String> {
        match (self.rtmp_url(), self.stream_key()) {
            (Some(url), Some(key)) => Some(format!("{url}/{key}")),
            _ => None,
        }
    }
}
