//! Pure transition table for session statuses.
//!
//! Used as a guard before every persisted transition; no side effects.
//! A transition request equal to the current state is treated by callers
//! as a no-op success, so reflexive transitions are not in the table.

use crate::types::SessionStatus;

use SessionStatus::*;

/// Allowed targets for each source state. Terminal states (`Cancelled`,
/// `Stopped`) have no outgoing transitions.
pub fn valid_targets(state: SessionStatus) -> &'static [SessionStatus] {
    match state {
        Idle => &[Ready, Cancelled, Aborted],
        Ready => &[Publishing, Cancelled, Idle, Aborted],
        Publishing => &[Live, Cancelled, Ready, Aborted],
        Live => &[Ending, Aborted],
        Ending => &[Stopped, Aborted],
        Aborted => &[Stopped, Cancelled],
        Scheduled | Cancelled | Stopped => &[],
    }
}

/// Check whether `current -> target` is a valid transition.
pub fn can_transition(current: SessionStatus, target: SessionStatus) -> bool {
    valid_targets(current).contains(&target)
}

/// Whether a state has no further outgoing transitions.
pub fn is_terminal(state: SessionStatus) -> bool {
    matches!(state, Cancelled | Stopped)
}

/// All states that can transition to `target`.
pub fn valid_sources(target: SessionStatus) -> Vec<SessionStatus> {
    const ALL: [SessionStatus; 9] = [
        Idle, Scheduled, Ready, Publishing, Live, Ending, Aborted, Cancelled, Stopped,
    ];
    ALL.iter()
        .copied()
        .filter(|s| can_transition(*s, target))
        .collect()
}
