//! User-facing session operations, grouped as `impl SessionEngine`
//! blocks: record CRUD in `sessions`, stream start in `egress`, teardown
//! in `end`.

pub mod egress;
pub mod end;
pub mod sessions;

pub use egress::{StartOutcome, StreamStartData};
pub use end::EndOutcome;
pub use sessions::{CreateSessionParams, ListSessionsParams, SessionPage, UpdateSessionParams};
