//! Engine handle: owns the store, collaborator planes, scheduler, and
//! config. Operation groups are `impl SessionEngine` blocks in the `ops`
//! and `reconcile` modules.

use std::sync::Arc;

use tracing::info;

use crate::collaborators::{IngestPlatform, PublishService, RoomControlPlane};
use crate::config::EngineConfig;
use crate::errors::{Result, SessionError};
use crate::scheduler::Scheduler;
use crate::state;
use crate::store::{DocumentStore, SessionPatch, SessionStore};
use crate::types::{utc_now, Session, SessionStatus};

pub struct SessionEngine {
    pub(crate) store: SessionStore,
    pub(crate) rooms: Arc<dyn RoomControlPlane>,
    pub(crate) ingest: Arc<dyn IngestPlatform>,
    pub(crate) publisher: Arc<dyn PublishService>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) config: EngineConfig,
}

impl SessionEngine {
    /// All dependencies are injected; there are no process-wide
    /// singletons behind this constructor.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        rooms: Arc<dyn RoomControlPlane>,
        ingest: Arc<dyn IngestPlatform>,
        publisher: Arc<dyn PublishService>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            store: SessionStore::new(store),
            rooms,
            ingest,
            publisher,
            scheduler,
            config,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Persist a state transition with the state-machine guard.
    ///
    /// Requesting the current state is a no-op success. Status writes
    /// always go through a single zero-retry CAS; a miss surfaces as
    /// `VersionConflict` for the caller to re-read and re-decide.
    /// Lifecycle timestamps ride along: `started_at` on the first entry
    /// to Live, `stopped_at` on the first entry to a stopping state.
    pub(crate) async fn update_session_state(
        &self,
        session: &mut Session,
        target: SessionStatus,
    ) -> Result<()> {
        if session.status == target {
            return Ok(());
        }
        if !state::can_transition(session.status, target) {
            return Err(SessionError::invalid_request(format!(
                "invalid transition {} -> {target} for session {}",
                session.status, session.session_id
            )));
        }

        let now = utc_now();
        let mut patch = SessionPatch::new().status(target).updated_at(now);
        if target == SessionStatus::Live && session.started_at.is_none() {
            patch.started_at = Some(now);
        }
        if matches!(
            target,
            SessionStatus::Stopped | SessionStatus::Aborted | SessionStatus::Cancelled
        ) && session.stopped_at.is_none()
        {
            patch.stopped_at = Some(now);
        }

        let from = session.status;
        self.store.partial_update(session, patch, 0).await?;
        info!(
            session_id = %session.session_id,
            from = %from,
            to = %target,
            "session state changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::SessionError;
    use crate::testutil::TestHarness;
    use crate::types::SessionStatus;

    #[tokio::test]
    async fn no_op_transition_succeeds_without_write() {
        let h = TestHarness::new().await;
        let mut session = h.seed_session(SessionStatus::Ready).await;
        let version = session.version;

        h.engine
            .update_session_state(&mut session, SessionStatus::Ready)
            .await
            .unwrap();
        assert_eq!(session.version, version);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let h = TestHarness::new().await;
        let mut session = h.seed_session(SessionStatus::Idle).await;

        let err = h
            .engine
            .update_session_state(&mut session, SessionStatus::Live)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
        assert_eq!(session.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn started_at_set_once_on_live_entry() {
        let h = TestHarness::new().await;
        let mut session = h.seed_session(SessionStatus::Publishing).await;
        assert!(session.started_at.is_none());

        h.engine
            .update_session_state(&mut session, SessionStatus::Live)
            .await
            .unwrap();
        let first = session.started_at.expect("started_at set");

        // Walk back around to Live; started_at must not move.
        h.engine
            .update_session_state(&mut session, SessionStatus::Aborted)
            .await
            .unwrap();
        assert!(session.stopped_at.is_some());
        assert_eq!(session.started_at, Some(first));
    }

    #[tokio::test]
    async fn stale_status_write_surfaces_version_conflict() {
        let h = TestHarness::new().await;
        let session = h.seed_session(SessionStatus::Publishing).await;

        let mut copy_a = session.clone();
        let mut copy_b = session.clone();
        h.engine
            .update_session_state(&mut copy_a, SessionStatus::Live)
            .await
            .unwrap();

        let err = h
            .engine
            .update_session_state(&mut copy_b, SessionStatus::Ready)
            .await
            .unwrap_err();
        assert!(err.is_lost_race());
    }
}
