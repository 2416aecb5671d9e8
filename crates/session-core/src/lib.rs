//! Session lifecycle orchestration for live broadcasts.
//!
//! A session is one broadcast attempt: a WebRTC room whose media is
//! egressed to an RTMP ingest platform and published to downstream feeds.
//! This crate owns the session state machine and drives the three
//! collaborator planes ([`collaborators::RoomControlPlane`],
//! [`collaborators::IngestPlatform`], [`collaborators::PublishService`])
//! through it.
//!
//! Concurrency control is optimistic: every session document carries a
//! version, all writes are compare-and-swap, and state transitions never
//! retry on a version miss. Webhook handlers and delayed reconciliation
//! tasks race with the synchronous start/stop paths by design; the losing
//! writer observes the conflict and backs off.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use livecast_session_core::config::EngineConfig;
//! use livecast_session_core::engine::SessionEngine;
//! use livecast_session_core::scheduler::TokioScheduler;
//! use livecast_session_core::store::MemoryStore;
//! # use livecast_session_core::collaborators::{RoomControlPlane, IngestPlatform, PublishService};
//! # fn planes() -> (Arc<dyn RoomControlPlane>, Arc<dyn IngestPlatform>, Arc<dyn PublishService>) { unimplemented!() }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (rooms, ingest, publisher) = planes();
//! let engine = SessionEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     rooms,
//!     ingest,
//!     publisher,
//!     Arc::new(TokioScheduler::new()),
//!     EngineConfig::default(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ops;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::EngineConfig;
pub use engine::SessionEngine;
pub use errors::{Result, SessionError};
pub use ops::{
    CreateSessionParams, EndOutcome, ListSessionsParams, SessionPage, StartOutcome,
    StreamStartData, UpdateSessionParams,
};
pub use reconcile::{HandlerOutcome, StreamEvent, StreamEventData};
pub use runtime::SessionRuntime;
pub use types::{Channel, ChannelId, RoomId, Session, SessionId, SessionStatus, UserId};
