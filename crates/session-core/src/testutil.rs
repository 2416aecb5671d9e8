//! Shared test fixtures: an engine wired to in-memory fakes for all
//! three collaborator planes and a recording scheduler whose task bodies
//! are driven directly by tests instead of timers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::collaborators::{
    IngestPlatform, IngestStream, PlaneError, PlaneResult, PublishService, RoomControlPlane,
    StreamStatus,
};
use crate::config::EngineConfig;
use crate::engine::SessionEngine;
use crate::runtime::{EgressRuntime, SessionRuntime, StreamRuntime};
use crate::scheduler::{Scheduler, TaskFuture, TaskHandle};
use crate::store::{MemoryStore, SessionPatch};
use crate::types::{
    utc_now, Channel, ChannelId, PlaybackId, RoomId, Session, SessionId, SessionStatus, UserId,
};

pub fn sample_channel(channel_id: &str, user_id: &str) -> Channel {
    Channel {
        channel_id: ChannelId(channel_id.to_string()),
        user_id: UserId(user_id.to_string()),
        title: Some("Test Channel".to_string()),
        location: Some("Test Location".to_string()),
        description: Some("A channel for tests".to_string()),
        cover: None,
        lang: Some("en".to_string()),
        category_ids: None,
        updated_at: utc_now(),
    }
}

pub fn sample_session(channel: &Channel, status: SessionStatus) -> Session {
    let now = utc_now();
    Session {
        session_id: SessionId::new(),
        room_id: RoomId::new(),
        channel_id: channel.channel_id.clone(),
        user_id: channel.user_id.clone(),
        title: channel.title.clone(),
        location: channel.location.clone(),
        description: channel.description.clone(),
        cover: channel.cover.clone(),
        lang: channel.lang.clone(),
        category_ids: channel.category_ids.clone(),
        status,
        max_participants: None,
        runtime: SessionRuntime::default(),
        created_at: now,
        updated_at: now,
        started_at: None,
        stopped_at: None,
        version: 1,
    }
}

/// Scheduler fake that records schedule and cancel calls and drops the
/// task future; task bodies are invoked directly by the tests that care.
#[derive(Default)]
pub struct RecordingScheduler {
    pending: DashMap<TaskHandle, String>,
    scheduled: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    seq: AtomicU32,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task names in scheduling order.
    pub fn scheduled_names(&self) -> Vec<String> {
        self.scheduled.lock().clone()
    }

    /// Handle ids of successfully cancelled tasks, in call order.
    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, name: &str, _delay: Duration, _task: TaskFuture) -> TaskHandle {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = TaskHandle(format!("task_{n}"));
        self.pending.insert(handle.clone(), name.to_string());
        self.scheduled.lock().push(name.to_string());
        handle
    }

    fn cancel(&self, handle: &TaskHandle) -> bool {
        match self.pending.remove(handle) {
            Some(_) => {
                self.cancelled.lock().push(handle.0.clone());
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub struct FakeRooms {
    fail_start_egress: AtomicBool,
    stop_egress_error: Mutex<Option<PlaneError>>,
    stopped: Mutex<Vec<String>>,
    seq: AtomicU32,
}

impl FakeRooms {
    pub fn fail_start_egress(&self, fail: bool) {
        self.fail_start_egress.store(fail, Ordering::SeqCst);
    }

    /// Error returned by the next `stop_egress` call, consumed once.
    pub fn set_stop_egress_error(&self, error: PlaneError) {
        *self.stop_egress_error.lock() = Some(error);
    }

    pub fn stopped_egress_ids(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

#[async_trait::async_trait]
impl RoomControlPlane for FakeRooms {
    async fn create_room(
        &self,
        _room_id: &RoomId,
        _max_participants: Option<u32>,
    ) -> PlaneResult<()> {
        Ok(())
    }

    async fn delete_room(&self, _room_id: &RoomId) -> PlaneResult<()> {
        Ok(())
    }

    async fn start_egress(&self, _room_id: &RoomId, _rtmp_url: &str) -> PlaneResult<String> {
        if self.fail_start_egress.load(Ordering::SeqCst) {
            return Err(PlaneError::failed("egress refused"));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("eg_{n}"))
    }

    async fn stop_egress(&self, egress_id: &str) -> PlaneResult<()> {
        if let Some(error) = self.stop_egress_error.lock().take() {
            return Err(error);
        }
        self.stopped.lock().push(egress_id.to_string());
        Ok(())
    }

    async fn update_room_metadata(&self, _room_id: &RoomId, _metadata: &str) -> PlaneResult<()> {
        Ok(())
    }
}

pub struct FakeIngest {
    created: AtomicU32,
    deleted: AtomicU32,
    completed: Mutex<Vec<String>>,
    fail_signal_complete: AtomicBool,
    status: Mutex<StreamStatus>,
    fail_status: AtomicBool,
    status_polls: AtomicU32,
}

impl FakeIngest {
    pub fn new() -> Self {
        Self {
            created: AtomicU32::new(0),
            deleted: AtomicU32::new(0),
            completed: Mutex::new(Vec::new()),
            fail_signal_complete: AtomicBool::new(false),
            status: Mutex::new(StreamStatus::Idle),
            fail_status: AtomicBool::new(false),
            status_polls: AtomicU32::new(0),
        }
    }

    pub fn created_stream_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted_stream_count(&self) -> u32 {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn completed_stream_ids(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn fail_signal_complete(&self, fail: bool) {
        self.fail_signal_complete.store(fail, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: StreamStatus) {
        *self.status.lock() = status;
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn status_poll_count(&self) -> u32 {
        self.status_polls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IngestPlatform for FakeIngest {
    async fn create_stream(&self, _correlation_token: &str) -> PlaneResult<IngestStream> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IngestStream {
            stream_id: format!("st_{n}"),
            stream_key: format!("sk_{n}"),
            playback_ids: vec![PlaybackId {
                id: format!("pb_{n}"),
                policy: "public".to_string(),
            }],
        })
    }

    async fn delete_stream(&self, _stream_id: &str) -> PlaneResult<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_stream_status(&self, _stream_id: &str) -> PlaneResult<StreamStatus> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(PlaneError::failed("status backend down"));
        }
        Ok(*self.status.lock())
    }

    async fn signal_stream_complete(&self, stream_id: &str) -> PlaneResult<()> {
        if self.fail_signal_complete.load(Ordering::SeqCst) {
            return Err(PlaneError::failed("signal refused"));
        }
        self.completed.lock().push(stream_id.to_string());
        Ok(())
    }

    fn animated_url(&self, playback_id: &str) -> String {
        format!("https://img.fake/{playback_id}/animated.gif")
    }

    fn thumbnail_url(&self, playback_id: &str) -> String {
        format!("https://img.fake/{playback_id}/thumbnail.jpg")
    }

    fn storyboard_url(&self, playback_id: &str) -> String {
        format!("https://img.fake/{playback_id}/storyboard.vtt")
    }
}

#[derive(Default)]
pub struct FakePublish {
    starts: AtomicU32,
    stops: Mutex<Vec<String>>,
    updates: Mutex<Vec<String>>,
}

impl FakePublish {
    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.lock().len()
    }

    pub fn updated_publish_ids(&self) -> Vec<String> {
        self.updates.lock().clone()
    }
}

#[async_trait::async_trait]
impl PublishService for FakePublish {
    async fn start(&self, _session: &Session) -> PlaneResult<String> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("pub_{n}"))
    }

    async fn stop(&self, publish_id: &str) -> PlaneResult<()> {
        self.stops.lock().push(publish_id.to_string());
        Ok(())
    }

    async fn update(&self, publish_id: &str, _session: &Session) -> PlaneResult<()> {
        self.updates.lock().push(publish_id.to_string());
        Ok(())
    }
}

pub struct TestHarness {
    pub engine: Arc<SessionEngine>,
    pub rooms: Arc<FakeRooms>,
    pub ingest: Arc<FakeIngest>,
    pub publisher: Arc<FakePublish>,
    pub scheduler: Arc<RecordingScheduler>,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    channel: Channel,
}

impl TestHarness {
    /// Engine over a fresh in-memory store with one seeded channel. All
    /// reconciliation delays are zero so task bodies run immediately when
    /// driven.
    pub async fn new() -> Self {
        let rooms = Arc::new(FakeRooms::default());
        let ingest = Arc::new(FakeIngest::new());
        let publisher = Arc::new(FakePublish::default());
        let scheduler = Arc::new(RecordingScheduler::new());

        let config = EngineConfig {
            stream_base_url: "https://stream.test".to_string(),
            rtmp_ingest_base_url: "rtmps://ingest.test:443".to_string(),
            startup_check_delay: Duration::ZERO,
            startup_check_retries: 3,
            startup_check_retry_delay: Duration::ZERO,
            cleanup_check_delay: Duration::ZERO,
            host_cleanup_delay: Duration::ZERO,
            ..EngineConfig::default()
        };

        let engine = SessionEngine::new(
            Arc::new(MemoryStore::new()),
            rooms.clone(),
            ingest.clone(),
            publisher.clone(),
            scheduler.clone(),
            config,
        )
        .expect("valid test config");

        let channel = sample_channel("ch_test", "u_host");
        engine
            .store()
            .save_channel(&channel)
            .await
            .expect("seed channel");

        Self {
            engine,
            rooms,
            ingest,
            publisher,
            scheduler,
            channel_id: channel.channel_id.clone(),
            user_id: channel.user_id.clone(),
            channel,
        }
    }

    pub fn channel_title(&self) -> Option<String> {
        self.channel.title.clone()
    }

    /// Insert a session in the given state for the harness channel, with
    /// an empty runtime and its own room.
    pub async fn seed_session(&self, status: SessionStatus) -> Session {
        let session = sample_session(&self.channel, status);
        self.engine
            .store()
            .insert(&session)
            .await
            .expect("seed session");
        session
    }

    /// Insert a session whose runtime already carries the provider
    /// identifiers a started stream would have: egress `eg_1`, ingest
    /// stream `st_1`.
    pub async fn seed_streaming_session(&self, status: SessionStatus) -> Session {
        let mut session = sample_session(&self.channel, status);
        let rtmp_url = self.engine.config().rtmp_app_url();
        session.runtime = SessionRuntime {
            egress: Some(EgressRuntime {
                egress_id: Some("eg_1".to_string()),
            }),
            stream: Some(StreamRuntime {
                stream_id: Some("st_1".to_string()),
                stream_key: Some("sk_1".to_string()),
                rtmp_url: Some(rtmp_url),
                playback_ids: Some(vec![PlaybackId {
                    id: "pb_live".to_string(),
                    policy: "public".to_string(),
                }]),
                active_asset_id: None,
            }),
            live_playback_url: Some(self.engine.config().playback_url("pb_live")),
            ..SessionRuntime::default()
        };
        self.engine
            .store()
            .insert(&session)
            .await
            .expect("seed streaming session");
        session
    }

    /// Insert `n` stopped sessions with strictly ascending `created_at`,
    /// whole milliseconds so listing cursors round-trip exactly. Returns
    /// their ids in insertion (oldest first) order.
    pub async fn seed_stopped_sessions(&self, n: usize) -> Vec<SessionId> {
        let base = chrono::Utc
            .timestamp_millis_opt(utc_now().timestamp_millis())
            .single()
            .expect("valid base time");
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            let mut session = sample_session(&self.channel, SessionStatus::Stopped);
            session.created_at = base + chrono::Duration::seconds(i as i64);
            ids.push(session.session_id.clone());
            self.engine
                .store()
                .insert(&session)
                .await
                .expect("seed stopped session");
        }
        ids
    }

    /// Persist a publish id onto a stored session, as if the live
    /// confirmation had already run.
    pub async fn seed_publish_id(&self, session: &Session) {
        let mut stored = self
            .engine
            .get_session(&session.session_id)
            .await
            .expect("session stored");
        let mut runtime = stored.runtime.clone();
        runtime.publish_id = Some("pub_seeded".to_string());
        self.engine
            .store()
            .partial_update(&mut stored, SessionPatch::new().runtime(runtime), 0)
            .await
            .expect("seed publish id");
    }
}
