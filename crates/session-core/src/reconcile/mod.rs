//! Reconciliation: webhook-driven and poll-driven handlers that advance
//! or correct session state after the synchronous start/stop paths have
//! returned. All of them race with each other by design; the losing
//! writer observes a version conflict and exits.

pub mod room_events;
pub mod tasks;
pub mod webhooks;

pub use webhooks::{HandlerOutcome, StreamEvent, StreamEventData};
