//! Free-list of idle coroutines
//!
//! Construction cost is paid once per concurrently-peak-live invocation,
//! not once per invocation. The pool grows on demand and is never
//! pre-warmed or bounded.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::coroutine::Coro;

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Coroutines currently parked in the pool
    pub idle: usize,
    /// Total coroutines ever constructed (lifetime)
    pub created: u64,
    /// Total acquisitions served from the free list (lifetime)
    pub reused: u64,
}

/// Free-list of idle coroutines, owned by one event loop
#[derive(Default)]
pub(crate) struct Pool {
    idle: RefCell<Vec<Rc<Coro>>>,
    created: Cell<u64>,
    reused: Cell<u64>,
}

impl Pool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hand out an idle coroutine, constructing one only if the pool is empty
    pub(crate) fn acquire(&self) -> Rc<Coro> {
        if let Some(coro) = self.idle.borrow_mut().pop() {
            self.reused.set(self.reused.get() + 1);
            trace!(coro = coro.id().raw(), "coroutine reused");
            return coro;
        }
        self.created.set(self.created.get() + 1);
        Coro::new()
    }

    /// Return a fully unwound coroutine to the free list
    ///
    /// Must never be called for a coroutine that is still suspended
    /// mid-body.
    pub(crate) fn release(&self, coro: Rc<Coro>) {
        debug_assert!(coro.state().is_idle());
        self.idle.borrow_mut().push(coro);
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.borrow().len(),
            created: self.created.get(),
            reused: self.reused.get(),
        }
    }
}
