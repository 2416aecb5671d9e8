use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors produced by the session lifecycle engine.
///
/// Validation and ownership errors fail fast before any mutation.
/// `VersionConflict` on a status write is never retried internally; the
/// caller must re-read and re-decide. Collaborator failures during
/// teardown are accumulated into a single `ExternalService` error that is
/// raised only after the local state transition has been persisted.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session or channel does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ownership mismatch between the requesting user and the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed input or a disallowed parameter combination
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Active session already exists, stream already in progress, or the
    /// session has reached a terminal state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Optimistic-concurrency check failed: the stored version no longer
    /// matches the expected version
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// A collaborator call failed; the message carries origin context
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Attempted transition from or through a terminal state
    #[error("Terminal state: {0}")]
    TerminalState(String),
}

impl SessionError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn version_conflict<S: Into<String>>(msg: S) -> Self {
        Self::VersionConflict(msg.into())
    }

    pub fn external<S: Into<String>>(msg: S) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn terminal<S: Into<String>>(msg: S) -> Self {
        Self::TerminalState(msg.into())
    }

    /// Whether this error means "someone else already advanced the
    /// session" rather than a real failure. Reconciliation tasks and
    /// webhook handlers log these and exit.
    pub fn is_lost_race(&self) -> bool {
        matches!(self, Self::VersionConflict(_))
    }
}
