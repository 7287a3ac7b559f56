//! `:error` callback registry
//!
//! Callbacks are the only guaranteed observation point for errors in
//! detached and forgotten work, which otherwise have no caller to re-raise
//! into. They are registered at two scopes: on the event loop (every
//! erroring conclusion) and on a single evaluation handle.
//!
//! Callbacks run synchronously at conclusion time, in registration order.
//! Panics inside a callback are not swallowed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Error;

type Callback = Rc<dyn Fn(&Error)>;

/// An ordered set of `:error` callbacks
#[derive(Default)]
pub struct Hooks {
    error: RefCell<Vec<Callback>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for the `:error` event
    pub fn on_error(&self, f: impl Fn(&Error) + 'static) {
        self.error.borrow_mut().push(Rc::new(f));
    }

    /// Invoke every registered callback with `err`, in registration order
    ///
    /// The list is snapshotted first so a callback may register further
    /// callbacks without invalidating the iteration.
    pub fn trigger(&self, err: &Error) {
        let snapshot: Vec<Callback> = self.error.borrow().clone();
        for cb in snapshot {
            cb(err);
        }
    }

    /// Check whether any callback is registered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.error.borrow().is_empty()
    }
}
