//! Stream start orchestration: provision an ingest stream, point room
//! egress at it, persist the provider identifiers, and move the session
//! to `Publishing`.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::engine::SessionEngine;
use crate::errors::{Result, SessionError};
use crate::runtime::{EgressRuntime, SessionRuntime, StreamRuntime};
use crate::state;
use crate::store::SessionPatch;
use crate::types::{PlaybackId, RoomId, Session, SessionStatus};

/// Provider identifiers handed back to the caller on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStartData {
    pub egress_id: String,
    pub stream_id: String,
    pub stream_key: String,
    pub rtmp_url: String,
    pub playback_ids: Vec<PlaybackId>,
}

/// Result of [`SessionEngine::start_live`]. A stream already running for
/// the room is a success that replays the persisted identifiers, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(StreamStartData),
    AlreadyInProgress(StreamStartData),
}

impl StartOutcome {
    pub fn data(&self) -> &StreamStartData {
        match self {
            Self::Started(data) | Self::AlreadyInProgress(data) => data,
        }
    }
}

impl SessionEngine {
    /// Start live streaming for a room.
    ///
    /// Idempotent on replay: a session already in `Publishing` or `Live`
    /// returns its persisted identifiers verbatim, or fails with
    /// `Conflict` when that runtime data is incomplete (a second stream
    /// is never started). A session in any other non-`Ready` state is
    /// aborted and recreated first. On any failure after the ingest
    /// stream was created, the stream is deleted as compensation before
    /// the error propagates.
    pub async fn start_live(self: &Arc<Self>, room_id: &RoomId) -> Result<StartOutcome> {
        info!(room_id = %room_id, "starting live stream");

        let mut session = self.get_active_session_by_room(room_id).await?;

        if matches!(
            session.status,
            SessionStatus::Publishing | SessionStatus::Live
        ) {
            let runtime = &session.runtime;
            let existing = match (
                runtime.egress_id(),
                runtime.stream_id(),
                runtime.stream_key(),
                runtime.rtmp_url(),
            ) {
                (Some(egress_id), Some(stream_id), Some(stream_key), Some(rtmp_url)) => {
                    Some(StreamStartData {
                        egress_id: egress_id.to_string(),
                        stream_id: stream_id.to_string(),
                        stream_key: stream_key.to_string(),
                        rtmp_url: rtmp_url.to_string(),
                        playback_ids: runtime
                            .stream
                            .as_ref()
                            .and_then(|s| s.playback_ids.clone())
                            .unwrap_or_default(),
                    })
                }
                _ => None,
            };
            return match existing {
                Some(data) => {
                    info!(
                        room_id = %room_id,
                        status = %session.status,
                        "live stream already in progress, replaying existing data"
                    );
                    Ok(StartOutcome::AlreadyInProgress(data))
                }
                None => Err(SessionError::conflict(format!(
                    "live stream in progress but missing egress data for room: {room_id}"
                ))),
            };
        }

        if session.status != SessionStatus::Ready {
            info!(
                room_id = %room_id,
                status = %session.status,
                "session not ready, aborting and recreating"
            );
            session = self.abort_and_recreate_session(session).await?;
        }

        let stream = self
            .ingest
            .create_stream(&session.correlation_token())
            .await
            .map_err(|e| SessionError::external(format!("ingest create stream: {e}")))?;

        match self.finish_start(&mut session, &stream).await {
            Ok(data) => {
                self.schedule_startup_check(session.session_id.clone(), stream.stream_id.clone());
                info!(room_id = %room_id, egress_id = %data.egress_id, "live stream started");
                Ok(StartOutcome::Started(data))
            }
            Err(e) => {
                error!(room_id = %room_id, error = %e, "live stream start failed");
                // Compensation: the stream was created but never went
                // into service.
                if let Err(cleanup) = self.ingest.delete_stream(&stream.stream_id).await {
                    error!(
                        stream_id = %stream.stream_id,
                        error = %cleanup,
                        "failed to clean up ingest stream after start failure"
                    );
                } else {
                    info!(stream_id = %stream.stream_id, "cleaned up ingest stream after start failure");
                }
                Err(e)
            }
        }
    }

    /// Steps after the ingest stream exists: egress start, runtime
    /// persistence, `Publishing` transition.
    async fn finish_start(
        &self,
        session: &mut Session,
        stream: &crate::collaborators::IngestStream,
    ) -> Result<StreamStartData> {
        let rtmp_url = self.config.rtmp_app_url();
        let destination = format!("{}/{}", rtmp_url, stream.stream_key);
        let egress_id = self
            .rooms
            .start_egress(&session.room_id, &destination)
            .await
            .map_err(|e| SessionError::external(format!("room egress start: {e}")))?;
        info!(room_id = %session.room_id, egress_id = %egress_id, "room egress started");

        // Playback URLs from the stream's playback id. The asset-ready
        // reconciliation later swaps in the asset's playback id, which
        // enables full-timeline scrubbing.
        let playback_id = stream.playback_ids.first().map(|pb| pb.id.clone());
        let mut runtime = SessionRuntime {
            egress: Some(EgressRuntime {
                egress_id: Some(egress_id.clone()),
            }),
            stream: Some(StreamRuntime {
                stream_id: Some(stream.stream_id.clone()),
                stream_key: Some(stream.stream_key.clone()),
                rtmp_url: Some(rtmp_url.clone()),
                playback_ids: Some(stream.playback_ids.clone()),
                active_asset_id: None,
            }),
            ..SessionRuntime::default()
        };
        if let Some(pb) = &playback_id {
            runtime.live_playback_url = Some(self.config.playback_url(pb));
            runtime.animated_url = Some(self.ingest.animated_url(pb));
            runtime.thumbnail_url = Some(self.ingest.thumbnail_url(pb));
            runtime.storyboard_url = Some(self.ingest.storyboard_url(pb));
        }

        self.store
            .partial_update(
                session,
                SessionPatch::new()
                    .runtime(runtime)
                    .updated_at(crate::types::utc_now()),
                2,
            )
            .await?;

        self.update_session_state(session, SessionStatus::Publishing)
            .await?;

        Ok(StreamStartData {
            egress_id,
            stream_id: stream.stream_id.clone(),
            stream_key: stream.stream_key.clone(),
            rtmp_url,
            playback_ids: stream.playback_ids.clone(),
        })
    }

    /// Walk a non-ready session to a terminal state and create a fresh
    /// `Ready` session for the same room.
    pub(crate) async fn abort_and_recreate_session(
        self: &Arc<Self>,
        mut session: Session,
    ) -> Result<Session> {
        let original_status = session.status;
        info!(
            session_id = %session.session_id,
            status = %original_status,
            room_id = %session.room_id,
            "aborting session and recreating"
        );

        if !state::is_terminal(session.status) {
            if state::can_transition(session.status, SessionStatus::Aborted) {
                self.update_session_state(&mut session, SessionStatus::Aborted)
                    .await?;
            }
            if session.status == SessionStatus::Aborted {
                self.update_session_state(&mut session, SessionStatus::Stopped)
                    .await?;
            } else if state::can_transition(session.status, SessionStatus::Cancelled) {
                self.update_session_state(&mut session, SessionStatus::Cancelled)
                    .await?;
            }
        }

        if !state::is_terminal(session.status) {
            return Err(SessionError::terminal(format!(
                "session {} could not reach a terminal state from {original_status}",
                session.session_id
            )));
        }

        let fresh = self.recreate_session_from_terminal(&session).await?;
        info!(
            session_id = %fresh.session_id,
            previous = %session.session_id,
            "created replacement ready session"
        );
        Ok(fresh)
    }
}
