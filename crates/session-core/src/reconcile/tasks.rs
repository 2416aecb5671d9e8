//! Delayed reconciliation tasks.
//!
//! Fire-and-forget jobs scheduled when an egress step completes, covering
//! for dropped or delayed webhooks. Each task re-checks the session state
//! before acting and treats a version conflict as "someone else already
//! handled it".

use std::sync::Arc;

use tracing::{info, warn};

use crate::collaborators::StreamStatus;
use crate::engine::SessionEngine;
use crate::scheduler::TaskHandle;
use crate::types::{SessionId, SessionStatus};

impl SessionEngine {
    /// Schedule the post-start poll that confirms the stream went active
    /// when the webhook does not arrive.
    pub(crate) fn schedule_startup_check(
        self: &Arc<Self>,
        session_id: SessionId,
        stream_id: String,
    ) -> TaskHandle {
        let engine = Arc::clone(self);
        self.scheduler.schedule(
            "startup-check",
            self.config.startup_check_delay,
            Box::pin(async move {
                engine.run_startup_check(session_id, stream_id).await;
            }),
        )
    }

    /// Schedule the post-end poll that finalizes an `Ending` session when
    /// the stream-idle webhook does not arrive.
    pub(crate) fn schedule_cleanup_check(
        self: &Arc<Self>,
        session_id: SessionId,
        stream_id: String,
    ) -> TaskHandle {
        let engine = Arc::clone(self);
        self.scheduler.schedule(
            "cleanup-check",
            self.config.cleanup_check_delay,
            Box::pin(async move {
                engine.run_cleanup_check(session_id, stream_id).await;
            }),
        )
    }

    /// Schedule teardown of a session whose host left the room.
    pub(crate) fn schedule_host_cleanup(self: &Arc<Self>, session_id: SessionId) -> TaskHandle {
        let engine = Arc::clone(self);
        self.scheduler.schedule(
            "host-cleanup",
            self.config.host_cleanup_delay,
            Box::pin(async move {
                engine.run_host_cleanup(session_id).await;
            }),
        )
    }

    /// Startup check body: poll the ingest platform until it reports the
    /// stream active, then run the confirmed-live sequence. Exits as soon
    /// as the session leaves `Publishing` (the webhook won the race) and
    /// exits silently when retries run out; the webhook remains the
    /// fallback path.
    pub(crate) async fn run_startup_check(self: Arc<Self>, session_id: SessionId, stream_id: String) {
        info!(session_id = %session_id, stream_id, "startup check running");
        let max_attempts = self.config.startup_check_retries.max(1);

        for attempt in 1..=max_attempts {
            let mut session = match self.get_session(&session_id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "session not found, startup check cancelled");
                    return;
                }
            };
            if session.status != SessionStatus::Publishing {
                info!(
                    session_id = %session_id,
                    status = %session.status,
                    "no longer publishing, startup check complete"
                );
                return;
            }

            match self.ingest.get_stream_status(&stream_id).await {
                Ok(StreamStatus::Active) => {
                    info!(session_id = %session_id, stream_id, "stream active, confirming live");
                    match self.confirm_live(&mut session).await {
                        Ok(()) => {}
                        Err(e) if e.is_lost_race() => {
                            info!(session_id = %session_id, "live transition already handled elsewhere");
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "failed to confirm live");
                        }
                    }
                    return;
                }
                Ok(status) => {
                    info!(
                        session_id = %session_id,
                        stream_id,
                        status = ?status,
                        attempt,
                        max_attempts,
                        "stream not active yet"
                    );
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        stream_id,
                        error = %e,
                        attempt,
                        max_attempts,
                        "failed to get stream status"
                    );
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.startup_check_retry_delay).await;
            }
        }

        warn!(
            session_id = %session_id,
            stream_id,
            "stream never reported active, leaving transition to the webhook"
        );
    }

    /// Cleanup check body: if the session is still `Ending` and the
    /// platform no longer reports the stream active (a status error
    /// counts as not active), notify the publish service and stop the
    /// session. An active stream defers cleanup to a later webhook or a
    /// manual end.
    pub(crate) async fn run_cleanup_check(self: Arc<Self>, session_id: SessionId, stream_id: String) {
        info!(session_id = %session_id, stream_id, "cleanup check running");

        let mut session = match self.get_session(&session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session not found, cleanup check cancelled");
                return;
            }
        };
        if session.status != SessionStatus::Ending {
            info!(
                session_id = %session_id,
                status = %session.status,
                "no longer ending, cleanup check complete"
            );
            return;
        }

        match self.ingest.get_stream_status(&stream_id).await {
            Ok(StreamStatus::Active) => {
                info!(session_id = %session_id, stream_id, "stream still active, deferring cleanup");
                return;
            }
            Ok(status) => {
                info!(session_id = %session_id, stream_id, status = ?status, "stream inactive, finalizing");
            }
            Err(e) => {
                // Status unknown: proceed rather than leave the session
                // stuck in Ending.
                warn!(session_id = %session_id, stream_id, error = %e, "stream status unknown, finalizing anyway");
            }
        }

        self.notify_publish_stopped(&session).await;
        match self
            .update_session_state(&mut session, SessionStatus::Stopped)
            .await
        {
            Ok(()) => info!(session_id = %session_id, "cleanup check stopped session"),
            Err(e) if e.is_lost_race() => {
                info!(session_id = %session_id, "stop already handled elsewhere");
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "cleanup check failed to stop session"),
        }
    }

    /// Host-cleanup body: end the session unless the host returned (the
    /// join handler clears the pending sub-record) or it already left the
    /// active states.
    pub(crate) async fn run_host_cleanup(self: Arc<Self>, session_id: SessionId) {
        info!(session_id = %session_id, "host cleanup running");

        let session = match self.get_session(&session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session not found, host cleanup cancelled");
                return;
            }
        };
        if !session.status.is_active() {
            info!(
                session_id = %session_id,
                status = %session.status,
                "session no longer active, host cleanup complete"
            );
            return;
        }
        if session.runtime.host_cleanup.is_none() {
            info!(session_id = %session_id, "host returned, cleanup cancelled");
            return;
        }

        match self.end_session(&session_id).await {
            Ok(ended) => {
                info!(session_id = %session_id, status = %ended.status, "session ended after host left")
            }
            Err(e) if e.is_lost_race() => {
                info!(session_id = %session_id, "session end already handled elsewhere");
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "host cleanup failed to end session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HostCleanup;
    use crate::testutil::TestHarness;
    use crate::types::utc_now;

    #[tokio::test]
    async fn startup_check_confirms_live_when_stream_active() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Publishing).await;
        h.ingest.set_status(StreamStatus::Active);

        h.engine
            .clone()
            .run_startup_check(session.session_id.clone(), "st_1".into())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Live);
        assert!(stored.runtime.publish_id.is_some());
        assert!(stored.started_at.is_some());
    }

    #[tokio::test]
    async fn startup_check_exits_when_webhook_already_won() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Live).await;
        h.ingest.set_status(StreamStatus::Active);

        h.engine
            .clone()
            .run_startup_check(session.session_id.clone(), "st_1".into())
            .await;

        // No publish call was made; the webhook path already did it.
        assert_eq!(h.publisher.start_count(), 0);
    }

    #[tokio::test]
    async fn startup_check_exhausts_retries_silently() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Publishing).await;
        h.ingest.set_status(StreamStatus::Idle);

        h.engine
            .clone()
            .run_startup_check(session.session_id.clone(), "st_1".into())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Publishing);
        assert!(h.ingest.status_poll_count() >= 2);
    }

    #[tokio::test]
    async fn cleanup_check_stops_ending_session_when_inactive() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Ending).await;
        h.seed_publish_id(&session).await;
        h.ingest.set_status(StreamStatus::Idle);

        h.engine
            .clone()
            .run_cleanup_check(session.session_id.clone(), "st_1".into())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Stopped);
        assert_eq!(h.publisher.stop_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_check_defers_while_stream_active() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Ending).await;
        h.ingest.set_status(StreamStatus::Active);

        h.engine
            .clone()
            .run_cleanup_check(session.session_id.clone(), "st_1".into())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Ending);
    }

    #[tokio::test]
    async fn cleanup_check_proceeds_on_status_error() {
        let h = TestHarness::new().await;
        let session = h.seed_streaming_session(SessionStatus::Ending).await;
        h.ingest.fail_status(true);

        h.engine
            .clone()
            .run_cleanup_check(session.session_id.clone(), "st_1".into())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn host_cleanup_ends_abandoned_session() {
        let h = TestHarness::new().await;
        let mut session = h.seed_session(SessionStatus::Ready).await;
        let mut runtime = session.runtime.clone();
        runtime.host_cleanup = Some(HostCleanup {
            task_id: Some("task_1".into()),
            host_left_at: Some(utc_now()),
        });
        h.engine
            .store()
            .partial_update(
                &mut session,
                crate::store::SessionPatch::new().runtime(runtime),
                0,
            )
            .await
            .unwrap();

        h.engine
            .clone()
            .run_host_cleanup(session.session_id.clone())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn host_cleanup_noop_when_host_returned() {
        let h = TestHarness::new().await;
        let session = h.seed_session(SessionStatus::Ready).await;
        // host_cleanup sub-record absent: the join handler cleared it.

        h.engine
            .clone()
            .run_host_cleanup(session.session_id.clone())
            .await;

        let stored = h.engine.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Ready);
    }
}
