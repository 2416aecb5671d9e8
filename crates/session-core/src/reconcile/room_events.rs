//! Room-platform event reconciliation: host presence and room teardown.
//!
//! Participant identity equals the session's owning `user_id` for the
//! host; events for other participants are ignored here.

use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::SessionEngine;
use crate::errors::Result;
use crate::reconcile::webhooks::HandlerOutcome;
use crate::runtime::HostCleanup;
use crate::scheduler::TaskHandle;
use crate::state;
use crate::store::{SessionLookup, SessionPatch};
use crate::types::{utc_now, RoomId, Session, SessionStatus};

impl SessionEngine {
    /// A participant joined the room. For the host: cancel any pending
    /// host-cleanup task (they came back) and move `Idle -> Ready`.
    pub async fn handle_participant_joined(
        self: &Arc<Self>,
        room_id: &RoomId,
        identity: &str,
    ) -> HandlerOutcome {
        match self.participant_joined_inner(room_id, identity).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_lost_race() => HandlerOutcome::Skipped {
                reason: "another writer advanced the session".into(),
            },
            Err(e) => {
                warn!(room_id = %room_id, identity, error = %e, "participant-joined handling failed");
                HandlerOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn participant_joined_inner(
        &self,
        room_id: &RoomId,
        identity: &str,
    ) -> Result<HandlerOutcome> {
        let Some(mut session) = self.active_room_session(room_id).await? else {
            return Ok(HandlerOutcome::Skipped {
                reason: "no active session for room".into(),
            });
        };
        if identity != session.user_id.0 {
            return Ok(HandlerOutcome::Skipped {
                reason: "participant is not the host".into(),
            });
        }

        if let Some(task_id) = session
            .runtime
            .host_cleanup
            .as_ref()
            .and_then(|hc| hc.task_id.clone())
        {
            let cancelled = self.scheduler.cancel(&TaskHandle(task_id.clone()));
            info!(
                session_id = %session.session_id,
                task_id,
                cancelled,
                "host returned, pending cleanup task cancelled"
            );
            let mut runtime = session.runtime.clone();
            runtime.host_cleanup = None;
            self.store
                .partial_update(
                    &mut session,
                    SessionPatch::new().runtime(runtime).updated_at(utc_now()),
                    2,
                )
                .await?;
        }

        if session.status == SessionStatus::Idle {
            self.update_session_state(&mut session, SessionStatus::Ready)
                .await?;
            info!(session_id = %session.session_id, "host joined, session ready");
        }
        Ok(HandlerOutcome::Handled {
            session_id: session.session_id,
            detail: "host joined".into(),
        })
    }

    /// The host left the room: schedule a delayed cleanup that ends the
    /// session unless they return before the delay elapses. The task
    /// handle is persisted so the join handler can cancel it.
    pub async fn handle_participant_left(
        self: &Arc<Self>,
        room_id: &RoomId,
        identity: &str,
    ) -> HandlerOutcome {
        let result = async {
            let Some(mut session) = self.active_room_session(room_id).await? else {
                return Ok(HandlerOutcome::Skipped {
                    reason: "no active session for room".into(),
                });
            };
            if identity != session.user_id.0 {
                return Ok(HandlerOutcome::Skipped {
                    reason: "participant is not the host".into(),
                });
            }

            let handle = self.schedule_host_cleanup(session.session_id.clone());
            info!(
                session_id = %session.session_id,
                task_id = %handle,
                delay_secs = self.config.host_cleanup_delay.as_secs(),
                "host left, cleanup scheduled"
            );

            let mut runtime = session.runtime.clone();
            runtime.host_cleanup = Some(HostCleanup {
                task_id: Some(handle.0.clone()),
                host_left_at: Some(utc_now()),
            });
            self.store
                .partial_update(
                    &mut session,
                    SessionPatch::new().runtime(runtime).updated_at(utc_now()),
                    2,
                )
                .await?;
            Ok::<_, crate::errors::SessionError>(HandlerOutcome::Handled {
                session_id: session.session_id,
                detail: "host cleanup scheduled".into(),
            })
        }
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(room_id = %room_id, identity, error = %e, "participant-left handling failed");
                HandlerOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// The room ended; walk the session to its terminal state. A session
    /// already gone (ended through the normal path) is not an error.
    pub async fn handle_room_finished(self: &Arc<Self>, room_id: &RoomId) -> HandlerOutcome {
        match self.room_finished_inner(room_id).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_lost_race() => HandlerOutcome::Skipped {
                reason: "another writer advanced the session".into(),
            },
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "room-finished handling failed");
                HandlerOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn room_finished_inner(&self, room_id: &RoomId) -> Result<HandlerOutcome> {
        let Some(mut session) = self.active_room_session(room_id).await? else {
            info!(room_id = %room_id, "room finished with no active session, already closed");
            return Ok(HandlerOutcome::Skipped {
                reason: "session already closed".into(),
            });
        };
        let prior = session.status;

        match prior {
            SessionStatus::Ending => {
                self.update_session_state(&mut session, SessionStatus::Stopped)
                    .await?;
            }
            SessionStatus::Ready => {
                warn!(session_id = %session.session_id, "room finished before going live, cancelling");
                self.update_session_state(&mut session, SessionStatus::Cancelled)
                    .await?;
            }
            SessionStatus::Publishing => {
                warn!(session_id = %session.session_id, "room finished while publishing, cancelling");
                self.update_session_state(&mut session, SessionStatus::Aborted)
                    .await?;
                self.update_session_state(&mut session, SessionStatus::Cancelled)
                    .await?;
            }
            _ => {
                warn!(
                    session_id = %session.session_id,
                    status = %prior,
                    "room finished unexpectedly, stopping session"
                );
                if state::can_transition(session.status, SessionStatus::Aborted) {
                    self.update_session_state(&mut session, SessionStatus::Aborted)
                        .await?;
                }
                self.update_session_state(&mut session, SessionStatus::Stopped)
                    .await?;
            }
        }
        info!(
            session_id = %session.session_id,
            from = %prior,
            to = %session.status,
            "room finished, session closed"
        );
        Ok(HandlerOutcome::Handled {
            session_id: session.session_id,
            detail: format!("{prior} -> {}", session.status),
        })
    }

    async fn active_room_session(&self, room_id: &RoomId) -> Result<Option<Session>> {
        self.store
            .find(&SessionLookup::ActiveByRoom(room_id.clone()))
            .await
    }
}
