//! Error types for the coproc runtime
//!
//! The taxonomy distinguishes three kinds of failure:
//!
//! - body errors (`Failed`, `Io`) raised by procedure bodies, stored on the
//!   evaluation and re-raised at `await_result`
//! - protocol misuse (`AlreadyScheduled`, `Concluded`, `NotSuspended`)
//!   raised synchronously to the misusing caller
//! - `Cancelled`, which is not a body error and is only visible to parties
//!   that explicitly awaited the cancelled evaluation
//!
//! Errors are `Clone` because a concluded error is shared with every waiter
//! of the evaluation; foreign payloads therefore live behind `Rc`.

use std::any::Any;
use std::io;
use std::rc::Rc;

/// Errors surfaced by the runtime
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The evaluation was cancelled before it concluded
    #[error("evaluation was cancelled")]
    Cancelled,

    /// `resume` was called while a resumption is already queued
    #[error("already scheduled to resume")]
    AlreadyScheduled,

    /// The evaluation already holds a result or error
    #[error("evaluation already concluded")]
    Concluded,

    /// A coroutine was resumed or cancelled in a state that does not allow it
    #[error("coroutine is not in a resumable state")]
    NotSuspended,

    /// The owning event loop was dropped while work was still in flight
    #[error("event loop is gone")]
    ShutDown,

    /// The event loop ran out of work before the awaited evaluation settled
    #[error("event loop has nothing left to run")]
    Stalled,

    /// A concluded value was retrieved with a different type than it holds
    #[error("concluded value has a different type")]
    TypeMismatch,

    /// An I/O error from the readiness reactor
    #[error("i/o error: {0}")]
    Io(Rc<io::Error>),

    /// An error raised by a procedure body
    #[error("{0}")]
    Failed(Rc<str>),
}

impl Error {
    /// Build a body error from a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Error::Failed(msg.into().into())
    }

    /// Check for the cancellation error
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Convert a panic payload into a body error
    ///
    /// Used by the coroutine trampoline to keep a panicking body from
    /// tearing down the pooled stack.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(msg) = payload.downcast_ref::<&str>() {
            Error::failed(format!("procedure body panicked: {msg}"))
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            Error::failed(format!("procedure body panicked: {msg}"))
        } else {
            Error::failed("procedure body panicked")
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Rc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::Cancelled), "evaluation was cancelled");
        assert_eq!(
            format!("{}", Error::AlreadyScheduled),
            "already scheduled to resume"
        );
        assert_eq!(format!("{}", Error::failed("boom")), "boom");
    }

    #[test]
    fn test_from_panic() {
        let err = Error::from_panic(Box::new("late"));
        assert_eq!(format!("{err}"), "procedure body panicked: late");

        let err = Error::from_panic(Box::new(String::from("later")));
        assert_eq!(format!("{err}"), "procedure body panicked: later");

        let err = Error::from_panic(Box::new(42_u8));
        assert_eq!(format!("{err}"), "procedure body panicked");
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::WouldBlock, "full").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_cancelled());
    }
}
