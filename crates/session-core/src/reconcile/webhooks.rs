//! Ingest-platform webhook reconciliation.
//!
//! Events carry a correlation token (`room_id|channel_id|session_id`)
//! and/or the platform's stream id; both are parsed defensively. Handlers
//! never propagate errors to the transport layer: every failure becomes a
//! structured [`HandlerOutcome`], and processing the same event twice
//! produces the same end state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::engine::SessionEngine;
use crate::errors::Result;
use crate::store::{SessionLookup, SessionPatch};
use crate::types::{utc_now, PlaybackId, Session, SessionId, SessionStatus};

pub const EVENT_STREAM_IDLE: &str = "video.live_stream.idle";
pub const EVENT_STREAM_DISCONNECTED: &str = "video.live_stream.disconnected";
pub const EVENT_ASSET_READY: &str = "video.asset.ready";
pub const EVENT_STATIC_RENDITIONS_READY: &str = "video.asset.static_renditions.ready";

/// Inbound webhook event shape as delivered by the ingest platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    pub data: StreamEventData,
}

/// Event payload. For stream events `id` is the stream id; for asset
/// events it is the asset id and `live_stream_id` points back at the
/// stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventData {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub passthrough: Option<String>,
    #[serde(default)]
    pub live_stream_id: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub playback_ids: Vec<PlaybackId>,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Structured, non-fatal handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The event advanced or confirmed session state.
    Handled {
        session_id: SessionId,
        detail: String,
    },
    /// Nothing to do: unknown session, state mismatch, unhandled event
    /// type, or another writer got there first.
    Skipped { reason: String },
    /// The handler hit a real error; logged, never propagated.
    Failed { reason: String },
}

impl HandlerOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled { .. })
    }

    fn handled(session_id: &SessionId, detail: impl Into<String>) -> Self {
        Self::Handled {
            session_id: session_id.clone(),
            detail: detail.into(),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Parsed correlation token. Missing or blank parts are `None` rather
/// than an error.
#[derive(Debug, Clone, Default)]
pub struct CorrelationToken {
    pub room_id: Option<String>,
    pub channel_id: Option<String>,
    pub session_id: Option<String>,
}

/// Parse a `room_id|channel_id|session_id` token defensively. Fewer than
/// three parts yields an empty token.
pub fn parse_correlation_token(token: &str) -> CorrelationToken {
    let parts: Vec<&str> = token.trim().split('|').map(str::trim).collect();
    if parts.len() < 3 {
        warn!(token, parts = parts.len(), "invalid correlation token format");
        return CorrelationToken::default();
    }
    let part = |s: &str| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    };
    CorrelationToken {
        room_id: part(parts[0]),
        channel_id: part(parts[1]),
        session_id: part(parts[2]),
    }
}

impl SessionEngine {
    /// Route an inbound platform event to its handler.
    ///
    /// Never returns an error; webhooks are best-effort and must not fail
    /// the endpoint that received them.
    pub async fn handle_stream_event(self: &Arc<Self>, event: &StreamEvent) -> HandlerOutcome {
        info!(event_type = %event.event_type, event_id = %event.id, "handling stream event");
        let result = match event.event_type.as_str() {
            EVENT_STREAM_IDLE | EVENT_STREAM_DISCONNECTED => self.handle_stream_idle(event).await,
            EVENT_ASSET_READY => self.handle_asset_ready(event).await,
            EVENT_STATIC_RENDITIONS_READY => self.handle_static_renditions_ready(event).await,
            other => {
                debug!(event_type = other, "unhandled event type");
                return HandlerOutcome::skipped(format!("unhandled event type: {other}"));
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_lost_race() => {
                info!(event_type = %event.event_type, "another writer advanced the session, skipping");
                HandlerOutcome::skipped("another writer advanced the session")
            }
            Err(e) => {
                error!(event_type = %event.event_type, error = %e, "stream event handler failed");
                HandlerOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Find the event's session: correlation token first, then the
    /// platform stream id stored in the runtime.
    pub(crate) async fn resolve_event_session(
        &self,
        passthrough: Option<&str>,
        stream_id: Option<&str>,
    ) -> Result<Option<Session>> {
        if let Some(token) = passthrough {
            if let Some(session_id) = parse_correlation_token(token).session_id {
                if let Some(session) = self
                    .store
                    .find(&SessionLookup::ById(SessionId(session_id)))
                    .await?
                {
                    return Ok(Some(session));
                }
            }
        }
        if let Some(stream_id) = stream_id {
            return self
                .store
                .find(&SessionLookup::ByStreamId(stream_id.to_string()))
                .await;
        }
        Ok(None)
    }

    /// Stream went idle or disconnected: `Ending -> Stopped` only. Any
    /// other state means the event is late, duplicated, or racing with a
    /// task, and is left untouched.
    async fn handle_stream_idle(self: &Arc<Self>, event: &StreamEvent) -> Result<HandlerOutcome> {
        let Some(mut session) = self
            .resolve_event_session(event.data.passthrough.as_deref(), Some(&event.data.id))
            .await?
        else {
            warn!(stream_id = %event.data.id, "no session found for idle event");
            return Ok(HandlerOutcome::skipped("session not found"));
        };

        if session.status != SessionStatus::Ending {
            info!(
                session_id = %session.session_id,
                status = %session.status,
                "stream idle in non-ending state, leaving untouched"
            );
            return Ok(HandlerOutcome::skipped(format!(
                "state mismatch: {}",
                session.status
            )));
        }

        self.notify_publish_stopped(&session).await;
        self.update_session_state(&mut session, SessionStatus::Stopped)
            .await?;
        Ok(HandlerOutcome::handled(
            &session.session_id,
            "ending -> stopped",
        ))
    }

    /// The stream's recording asset became available.
    ///
    /// Swaps the playback URLs over to the asset's playback id (full
    /// timeline instead of the stream's short window) and, when the
    /// session is still `Publishing`, performs the confirmed-live
    /// sequence: obtain a publish id, persist it, transition to `Live`.
    async fn handle_asset_ready(self: &Arc<Self>, event: &StreamEvent) -> Result<HandlerOutcome> {
        let asset_id = &event.data.id;
        if event.data.is_live != Some(true) {
            debug!(asset_id, "asset not from an active live stream, skipping");
            return Ok(HandlerOutcome::skipped("asset not from an active live stream"));
        }

        let Some(mut session) = self
            .resolve_event_session(
                event.data.passthrough.as_deref(),
                event.data.live_stream_id.as_deref(),
            )
            .await?
        else {
            warn!(asset_id, "no session found for asset ready event");
            return Ok(HandlerOutcome::skipped("session not found"));
        };

        // Prefer the public playback id, fall back to the first.
        let playback_id = event
            .data
            .playback_ids
            .iter()
            .find(|pb| pb.policy == "public")
            .or_else(|| event.data.playback_ids.first())
            .map(|pb| pb.id.clone());
        let Some(playback_id) = playback_id else {
            warn!(asset_id, "no playback id in asset");
            return Ok(HandlerOutcome::Failed {
                reason: "no playback id in asset".into(),
            });
        };

        let mut runtime = session.runtime.clone();
        runtime.live_playback_url = Some(self.config.playback_url(&playback_id));
        runtime.animated_url = Some(self.ingest.animated_url(&playback_id));
        runtime.thumbnail_url = Some(self.ingest.thumbnail_url(&playback_id));
        runtime.storyboard_url = Some(self.ingest.storyboard_url(&playback_id));
        if let Some(stream) = runtime.stream.as_mut() {
            stream.active_asset_id = Some(asset_id.clone());
        }
        self.store
            .partial_update(
                &mut session,
                SessionPatch::new().runtime(runtime).updated_at(utc_now()),
                2,
            )
            .await?;
        info!(
            session_id = %session.session_id,
            asset_id,
            playback_id,
            "session playback updated to asset"
        );

        if session.status == SessionStatus::Publishing {
            self.confirm_live(&mut session).await?;
            Ok(HandlerOutcome::handled(
                &session.session_id,
                "publishing -> live",
            ))
        } else {
            debug!(
                session_id = %session.session_id,
                status = %session.status,
                "not publishing, playback update only"
            );
            Ok(HandlerOutcome::handled(&session.session_id, "playback updated"))
        }
    }

    /// Stable on-demand renditions are available: persist the VOD URL,
    /// no status change.
    async fn handle_static_renditions_ready(
        &self,
        event: &StreamEvent,
    ) -> Result<HandlerOutcome> {
        let Some(mut session) = self
            .resolve_event_session(
                event.data.passthrough.as_deref(),
                event.data.live_stream_id.as_deref(),
            )
            .await?
        else {
            warn!(asset_id = %event.data.id, "no session found for static renditions event");
            return Ok(HandlerOutcome::skipped("session not found"));
        };

        let Some(playback_id) = event.data.playback_ids.first().map(|pb| pb.id.clone()) else {
            warn!(asset_id = %event.data.id, "no playback id for static renditions");
            return Ok(HandlerOutcome::skipped("no playback id in asset"));
        };

        let mut runtime = session.runtime.clone();
        runtime.vod_playback_url = Some(self.config.playback_url(&playback_id));
        self.store
            .partial_update(
                &mut session,
                SessionPatch::new().runtime(runtime).updated_at(utc_now()),
                2,
            )
            .await?;
        info!(
            session_id = %session.session_id,
            vod_playback_url = %session.runtime.vod_playback_url.as_deref().unwrap_or_default(),
            "vod playback url set"
        );
        Ok(HandlerOutcome::handled(&session.session_id, "vod url set"))
    }

    /// The canonical confirmed-live sequence, shared by the asset-ready
    /// handler and the startup reconciliation task: obtain a publish id
    /// (idempotent, skipped when one is stored), persist it, then move
    /// `Publishing -> Live` with a zero-retry status write.
    pub(crate) async fn confirm_live(&self, session: &mut Session) -> Result<()> {
        if session.status != SessionStatus::Publishing {
            debug!(
                session_id = %session.session_id,
                status = %session.status,
                "not publishing, skipping live confirmation"
            );
            return Ok(());
        }

        if session.runtime.publish_id.is_none() {
            let publish_id = self
                .publisher
                .start(session)
                .await
                .map_err(|e| crate::errors::SessionError::external(format!("publish start: {e}")))?;
            info!(session_id = %session.session_id, publish_id, "publish started");
            let mut runtime = session.runtime.clone();
            runtime.publish_id = Some(publish_id);
            self.store
                .partial_update(
                    session,
                    SessionPatch::new().runtime(runtime).updated_at(utc_now()),
                    2,
                )
                .await?;
        } else {
            info!(
                session_id = %session.session_id,
                publish_id = %session.runtime.publish_id.as_deref().unwrap_or_default(),
                "publish already started, skipping"
            );
        }

        self.update_session_state(session, SessionStatus::Live).await
    }

    /// Best-effort stop notification to the publish service.
    pub(crate) async fn notify_publish_stopped(&self, session: &Session) {
        let Some(publish_id) = session.runtime.publish_id.as_deref() else {
            debug!(session_id = %session.session_id, "no publish id, skipping stop notification");
            return;
        };
        match self.publisher.stop(publish_id).await {
            Ok(()) => info!(session_id = %session.session_id, publish_id, "publish stopped"),
            Err(e) => {
                warn!(session_id = %session.session_id, publish_id, error = %e, "publish stop failed")
            }
        }
    }
}
