use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SessionError};

/// Engine configuration.
///
/// Delays are injected here rather than hard-coded in the reconciliation
/// tasks so tests can drive the task bodies without real timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL for HLS playback, e.g. `https://stream.example.com`.
    /// Playback URLs are `{base}/{playback_id}.m3u8`.
    pub stream_base_url: String,
    /// Base URL for RTMP ingest; the `/app` path and stream key are
    /// appended when the egress destination is built.
    pub rtmp_ingest_base_url: String,

    /// Initial delay before the startup reconciliation check first polls
    pub startup_check_delay: Duration,
    /// Maximum startup-check poll attempts before giving up (the webhook
    /// remains the fallback path)
    pub startup_check_retries: u32,
    /// Delay between startup-check poll attempts
    pub startup_check_retry_delay: Duration,

    /// Delay before the cleanup reconciliation check runs
    pub cleanup_check_delay: Duration,

    /// Delay before an absent host's session is torn down
    pub host_cleanup_delay: Duration,

    /// Default and maximum page sizes for session listing
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_base_url: "https://stream.livecast.example".to_string(),
            rtmp_ingest_base_url: "rtmps://ingest.livecast.example:443".to_string(),
            startup_check_delay: Duration::from_secs(30),
            startup_check_retries: 10,
            startup_check_retry_delay: Duration::from_secs(30),
            cleanup_check_delay: Duration::from_secs(60),
            host_cleanup_delay: Duration::from_secs(600),
            default_page_size: 20,
            max_page_size: 1000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stream_base_url.is_empty() {
            return Err(SessionError::invalid_request("stream_base_url must be set"));
        }
        if self.rtmp_ingest_base_url.is_empty() {
            return Err(SessionError::invalid_request(
                "rtmp_ingest_base_url must be set",
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(SessionError::invalid_request(
                "default_page_size must be in 1..=max_page_size",
            ));
        }
        if self.max_page_size == 0 {
            return Err(SessionError::invalid_request("max_page_size must be > 0"));
        }
        Ok(())
    }

    /// RTMP application endpoint the ingest platform listens on.
    pub fn rtmp_app_url(&self) -> String {
        format!("{}/app", self.rtmp_ingest_base_url)
    }

    /// HLS playback URL for a playback id.
    pub fn playback_url(&self, playback_id: &str) -> String {
        format!("{}/{playback_id}.m3u8", self.stream_base_url)
    }
}
