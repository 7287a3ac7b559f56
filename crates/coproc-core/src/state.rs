//! Evaluation phase and coroutine state types

use core::fmt;

/// Phase of an evaluation
///
/// The phase only ever moves forward: once an evaluation is concluded or
/// cancelled it never becomes pending again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EvalPhase {
    /// The body has not finished yet
    Pending = 0,

    /// The body finished, or the evaluation was force-concluded;
    /// a result or error is stored
    Concluded = 1,

    /// Explicitly terminated before concluding
    Cancelled = 2,
}

impl EvalPhase {
    /// Check if the evaluation can still be resumed or concluded
    #[inline]
    pub const fn is_pending(&self) -> bool {
        matches!(self, EvalPhase::Pending)
    }

    /// Check if the evaluation has reached a final phase
    #[inline]
    pub const fn is_settled(&self) -> bool {
        matches!(self, EvalPhase::Concluded | EvalPhase::Cancelled)
    }
}

impl fmt::Display for EvalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalPhase::Pending => write!(f, "pending"),
            EvalPhase::Concluded => write!(f, "concluded"),
            EvalPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State of a pooled coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroState {
    /// Parked in the pool (or just finished), waiting for a procedure body
    Idle = 0,

    /// Currently executing on the thread
    Running = 1,

    /// Blocked mid-body at a suspension point
    Suspended = 2,
}

impl CoroState {
    /// Check if the coroutine may be handed a new procedure body
    #[inline]
    pub const fn is_idle(&self) -> bool {
        matches!(self, CoroState::Idle)
    }

    /// Check if the coroutine is parked at a suspension point
    #[inline]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, CoroState::Suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert!(EvalPhase::Pending.is_pending());
        assert!(!EvalPhase::Pending.is_settled());

        assert!(EvalPhase::Concluded.is_settled());
        assert!(EvalPhase::Cancelled.is_settled());
        assert!(!EvalPhase::Concluded.is_pending());
    }

    #[test]
    fn test_coro_states() {
        assert!(CoroState::Idle.is_idle());
        assert!(!CoroState::Running.is_idle());
        assert!(CoroState::Suspended.is_suspended());
        assert!(!CoroState::Running.is_suspended());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(format!("{}", EvalPhase::Pending), "pending");
        assert_eq!(format!("{}", EvalPhase::Cancelled), "cancelled");
    }
}
