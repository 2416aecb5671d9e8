//! Stream and session teardown.
//!
//! `end_live` stops the collaborator resources and moves the session
//! toward a terminal state, accumulating collaborator failures so the
//! state transition always happens before any error surfaces.

use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::SessionEngine;
use crate::errors::{Result, SessionError};
use crate::state;
use crate::types::{RoomId, Session, SessionId, SessionStatus};

/// Result of [`SessionEngine::end_live`]. Ending a stream that no longer
/// has an active session is a success, deliberate idempotence for
/// duplicate end calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    AlreadyEnded,
}

impl SessionEngine {
    /// End live streaming for a room.
    ///
    /// Stops the egress and signals the ingest stream complete, both
    /// attempted regardless of each other's outcome; an egress that
    /// already finished on its own counts as success. The state
    /// transition is computed from the status observed before any
    /// mutation: `Live` moves to `Ending` (and schedules the cleanup
    /// check); any other active state is walked through `Aborted` to
    /// `Stopped` when it had been `Ending`, else `Cancelled`. Accumulated
    /// collaborator failures are raised as one `ExternalService` error
    /// only after the transition has been persisted.
    pub async fn end_live(
        self: &Arc<Self>,
        room_id: &RoomId,
        egress_id: &str,
        stream_id: &str,
    ) -> Result<EndOutcome> {
        info!(room_id = %room_id, egress_id, stream_id, "ending live stream");

        let mut session = match self
            .store
            .find(&crate::store::SessionLookup::ActiveByRoom(room_id.clone()))
            .await?
        {
            Some(session) => session,
            None => {
                info!(room_id = %room_id, "no active session for room, treating as already ended");
                return Ok(EndOutcome::AlreadyEnded);
            }
        };

        let mut failures: Vec<String> = Vec::new();

        match self.rooms.stop_egress(egress_id).await {
            Ok(()) => info!(egress_id, "room egress stopped"),
            Err(e) if e.is_already_finished() => {
                info!(egress_id, reason = %e, "egress already finished, continuing");
            }
            Err(e) => {
                warn!(egress_id, error = %e, "failed to stop room egress");
                failures.push(format!("stop egress {egress_id}: {e}"));
            }
        }

        match self.ingest.signal_stream_complete(stream_id).await {
            Ok(()) => info!(stream_id, "ingest stream signalled complete"),
            Err(e) => {
                warn!(stream_id, error = %e, "failed to signal stream complete");
                failures.push(format!("signal stream complete {stream_id}: {e}"));
            }
        }

        // Target computed from the status before any transition below
        // mutates it.
        let prior = session.status;
        let transition = async {
            if prior == SessionStatus::Live {
                self.update_session_state(&mut session, SessionStatus::Ending)
                    .await?;
                self.schedule_cleanup_check(session.session_id.clone(), stream_id.to_string());
            } else {
                self.update_session_state(&mut session, SessionStatus::Aborted)
                    .await?;
                let final_state = if prior == SessionStatus::Ending {
                    SessionStatus::Stopped
                } else {
                    SessionStatus::Cancelled
                };
                self.update_session_state(&mut session, final_state).await?;
            }
            Ok::<(), SessionError>(())
        };
        if let Err(e) = transition.await {
            warn!(room_id = %room_id, error = %e, "failed to update session state during end");
            failures.push(format!("state update for room {room_id}: {e}"));
        }

        if !failures.is_empty() {
            return Err(SessionError::external(format!(
                "live stream ended with errors: {}",
                failures.join("; ")
            )));
        }
        info!(room_id = %room_id, "live stream ended");
        Ok(EndOutcome::Ended)
    }

    /// User-initiated session teardown. Does not delete the room.
    ///
    /// When the runtime carries egress and stream identifiers, `end_live`
    /// runs first, best-effort; the state walk below then resumes from
    /// whatever state it left behind. A session that never went live is
    /// cancelled rather than stopped.
    pub async fn end_session(self: &Arc<Self>, session_id: &SessionId) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        let prior = session.status;
        info!(session_id = %session_id, status = %prior, "ending session");

        if let (Some(egress_id), Some(stream_id)) = (
            session.runtime.egress_id().map(str::to_string),
            session.runtime.stream_id().map(str::to_string),
        ) {
            if let Err(e) = self
                .end_live(&session.room_id, &egress_id, &stream_id)
                .await
            {
                warn!(session_id = %session_id, error = %e, "end_live failed, continuing with state update");
            }
        }

        // end_live may have advanced the session; resume from the stored
        // state.
        let mut session = self.get_session(session_id).await?;
        match prior {
            SessionStatus::Idle | SessionStatus::Ready | SessionStatus::Publishing => {
                self.walk_to(&mut session, SessionStatus::Cancelled).await?;
            }
            SessionStatus::Live => {
                // Ending is the resting state; the stream-idle webhook or
                // the cleanup check finishes the walk to Stopped.
                if session.status == SessionStatus::Live {
                    self.update_session_state(&mut session, SessionStatus::Ending)
                        .await?;
                    if let Some(stream_id) = session.runtime.stream_id().map(str::to_string) {
                        self.schedule_cleanup_check(session.session_id.clone(), stream_id);
                    }
                }
            }
            SessionStatus::Ending | SessionStatus::Aborted => {
                self.walk_to(&mut session, SessionStatus::Stopped).await?;
            }
            SessionStatus::Scheduled | SessionStatus::Cancelled | SessionStatus::Stopped => {
                warn!(
                    session_id = %session_id,
                    status = %session.status,
                    "session not endable from its current state, skipping state update"
                );
            }
        }

        Ok(session)
    }

    /// Advance a session to `target`, routing through `Aborted` when the
    /// direct transition is not in the table. No-op when already there.
    async fn walk_to(&self, session: &mut Session, target: SessionStatus) -> Result<()> {
        if session.status == target || state::is_terminal(session.status) {
            return Ok(());
        }
        if !state::can_transition(session.status, target) {
            if state::can_transition(session.status, SessionStatus::Aborted) {
                self.update_session_state(session, SessionStatus::Aborted)
                    .await?;
            }
            if !state::can_transition(session.status, target) {
                warn!(
                    session_id = %session.session_id,
                    status = %session.status,
                    target = %target,
                    "no path to target state, leaving session as is"
                );
                return Ok(());
            }
        }
        self.update_session_state(session, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::PlaneError;
    use crate::testutil::TestHarness;

    #[tokio::test]
    async fn end_live_without_session_is_already_ended() {
        let h = TestHarness::new().await;
        let outcome = h
            .engine
            .end_live(&RoomId("ro_gone".into()), "eg_1", "st_1")
            .await
            .unwrap();
        assert_eq!(outcome, EndOutcome::AlreadyEnded);
    }

    #[tokio::test]
    async fn end_live_from_live_moves_to_ending_and_schedules_cleanup() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Live).await;

        let outcome = h
            .engine
            .end_live(&session.room_id, "eg_1", "st_1")
            .await
            .unwrap();
        assert_eq!(outcome, EndOutcome::Ended);

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Ending);
        assert_eq!(h.scheduler.scheduled_names(), vec!["cleanup-check"]);
        assert_eq!(h.rooms.stopped_egress_ids(), vec!["eg_1"]);
        assert_eq!(h.ingest.completed_stream_ids(), vec!["st_1"]);
    }

    #[tokio::test]
    async fn end_live_from_ending_walks_to_stopped() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Ending).await;

        h.engine
            .end_live(&session.room_id, "eg_1", "st_1")
            .await
            .unwrap();

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Stopped);
        assert!(stored.stopped_at.is_some());
    }

    #[tokio::test]
    async fn end_live_from_publishing_cancels() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Publishing).await;

        h.engine
            .end_live(&session.room_id, "eg_1", "st_1")
            .await
            .unwrap();

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn already_finished_egress_is_not_an_error() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Live).await;
        h.rooms
            .set_stop_egress_error(PlaneError::EgressAlreadyFinished("EGRESS_COMPLETE".into()));

        let outcome = h
            .engine
            .end_live(&session.room_id, "eg_1", "st_1")
            .await
            .unwrap();
        assert_eq!(outcome, EndOutcome::Ended);
    }

    #[tokio::test]
    async fn collaborator_failures_surface_after_state_is_persisted() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Live).await;
        h.rooms
            .set_stop_egress_error(PlaneError::failed("egress backend down"));
        h.ingest.fail_signal_complete(true);

        let err = h
            .engine
            .end_live(&session.room_id, "eg_1", "st_1")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ExternalService(_)));
        // Both failures are in the aggregate.
        let msg = err.to_string();
        assert!(msg.contains("stop egress"));
        assert!(msg.contains("signal stream complete"));

        // State correctness won over surfacing the failure.
        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Ending);
    }

    #[tokio::test]
    async fn end_session_state_matrix() {
        let h = TestHarness::new().await;

        let idle = h.seed_session(SessionStatus::Idle).await;
        let ended = h.engine.end_session(&idle.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Cancelled);

        let live = h.seed_streaming_session(SessionStatus::Live).await;
        let ended = h.engine.end_session(&live.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ending);

        let aborted = h.seed_session(SessionStatus::Aborted).await;
        let ended = h.engine.end_session(&aborted.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn end_session_is_tolerant_of_terminal_sessions() {
        let h = TestHarness::new().await;
        let stopped = h.seed_session(SessionStatus::Stopped).await;
        let ended = h.engine.end_session(&stopped.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Stopped);
    }
}
