//! The per-thread event loop
//!
//! One loop owns one run queue, one coroutine pool, a clock and a
//! reactor. It runs on the thread that created it; nothing here is Send.
//! A turn of the loop drains the immediate queue to exhaustion, then
//! blocks on the reactor until the earliest timer deadline or descriptor
//! readiness, whichever comes first.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use coproc_core::{unit_value, Error, Hooks};

use crate::clock::{Clock, MonotonicClock};
use crate::coroutine::{Resume, Step};
use crate::evaluation::Evaluation;
use crate::pool::{Pool, PoolStats};
use crate::reactor::{IoToken, PollReactor, Reactor};
use crate::run_queue::{RunQueue, Unit};

/// Shared state behind every [`EventLoop`] handle
pub(crate) struct Inner {
    pub(crate) queue: RunQueue,
    pub(crate) pool: Pool,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) reactor: Box<dyn Reactor>,
    /// Units suspended awaiting descriptor readiness, by registration
    pub(crate) watches: RefCell<HashMap<IoToken, Unit>>,
    /// Loop-global `:error` callbacks
    pub(crate) hooks: Hooks,
}

impl Inner {
    /// Process the immediate queue to exhaustion
    ///
    /// Entries appended while draining (cascading wakeups, conclusions)
    /// are handled in the same pass.
    pub(crate) fn drain(&self) -> Result<(), Error> {
        while let Some((unit, resume)) = self.queue.pop_immediate() {
            self.resume_unit(unit, resume)?;
        }
        Ok(())
    }

    fn resume_unit(&self, unit: Unit, resume: Resume) -> Result<(), Error> {
        let coro = match &unit {
            Unit::Coro(c) => c.clone(),
            Unit::Eval(ev) => {
                ev.clear_scheduled();
                // Settled while its resumption sat in the queue.
                if ev.phase().is_settled() {
                    trace!(eval = ev.id().raw(), "dropping stale resumption");
                    return Ok(());
                }
                match ev.coro() {
                    Some(c) => c,
                    None => return Ok(()),
                }
            }
        };
        match coro.resume(resume)? {
            Step::Yielded => Ok(()),
            Step::Done(result) => {
                match &unit {
                    Unit::Eval(ev) => {
                        if ev.phase().is_settled() {
                            // The body already settled itself; the settle
                            // path left the running coroutine for us.
                            self.pool.release(coro);
                        } else {
                            // The body died without settling (a panic at a
                            // suspension point); conclude on its behalf so
                            // waiters and hooks still fire. Settling takes
                            // care of releasing the idle coroutine.
                            ev.conclude_from_body(result);
                        }
                    }
                    Unit::Coro(_) => {
                        self.pool.release(coro);
                        // No handle exists; the loop-global callbacks are
                        // the only observation point for the error.
                        if let Err(err) = &result {
                            self.hooks.trigger(err);
                        }
                    }
                }
                Ok(())
            }
            Step::Parked => {
                self.pool.release(coro);
                Ok(())
            }
        }
    }

    /// Block until an external event can produce work
    ///
    /// Returns `false` when nothing external is pending, meaning the loop
    /// has nothing left to wait for.
    pub(crate) fn wait_external(&self) -> Result<bool, Error> {
        let next = self.queue.next_deadline();
        if next.is_none() && self.watches.borrow().is_empty() {
            return Ok(false);
        }

        let now = self.clock.now();
        let timeout = next.map(|deadline| deadline.saturating_duration_since(now));
        let mut ready = Vec::new();
        self.reactor.wait(timeout, &mut ready)?;

        for token in ready {
            let unit = self.watches.borrow_mut().remove(&token);
            if let Some(unit) = unit {
                self.reactor.remove(token);
                if let Unit::Eval(ev) = &unit {
                    ev.set_watch(None);
                }
                self.queue
                    .schedule_immediately(unit, Resume::Deliver(Ok(unit_value())));
            }
        }

        self.queue.move_due(self.clock.now());
        Ok(true)
    }

    /// Drop a descriptor watch, both from the loop and the reactor
    pub(crate) fn remove_watch(&self, token: IoToken) {
        self.watches.borrow_mut().remove(&token);
        self.reactor.remove(token);
    }
}

/// A single-threaded cooperative event loop
///
/// Cheap to clone; all clones drive the same loop. Construct one per
/// thread and invoke [`Procedure`](crate::proc::Procedure)s against it.
#[derive(Clone)]
pub struct EventLoop {
    pub(crate) inner: Rc<Inner>,
}

impl EventLoop {
    /// A loop backed by the real clock and the `poll(2)` reactor
    pub fn new() -> Self {
        Self::with_parts(MonotonicClock, PollReactor::new())
    }

    /// A loop with substituted collaborators, for tests and embedding
    pub fn with_parts(clock: impl Clock + 'static, reactor: impl Reactor + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                queue: RunQueue::new(),
                pool: Pool::new(),
                clock: Box::new(clock),
                reactor: Box::new(reactor),
                watches: RefCell::new(HashMap::new()),
                hooks: Hooks::new(),
            }),
        }
    }

    /// Register a loop-global `:error` callback
    ///
    /// Fires whenever any evaluation on this loop concludes with an
    /// error, before that evaluation's own callbacks. Callbacks must not
    /// suspend.
    pub fn on_error(&self, f: impl Fn(&Error) + 'static) {
        self.inner.hooks.on_error(f);
    }

    /// Snapshot of coroutine pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Drive the loop until no work remains
    ///
    /// Returns once the immediate queue, the delayed queue and the watch
    /// table are all empty.
    pub fn run(&self) -> Result<(), Error> {
        debug!("event loop running");
        loop {
            self.inner.drain()?;
            if !self.inner.wait_external()? {
                debug!("event loop idle, returning");
                return Ok(());
            }
        }
    }

    /// Drive the loop until `eval` settles, then return its result
    ///
    /// The bridge from synchronous code into the loop: re-raises the
    /// evaluation's error, including [`Error::Cancelled`]. Fails with
    /// [`Error::Stalled`] if the loop runs out of work while `eval` is
    /// still pending (a deadlock, e.g. the evaluation awaits a resumption
    /// nothing will ever send).
    pub fn run_until<T: Any>(&self, eval: &Evaluation<T>) -> Result<Rc<T>, Error> {
        loop {
            if let Some(result) = eval.result() {
                return result;
            }
            self.inner.drain()?;
            if let Some(result) = eval.result() {
                return result;
            }
            if !self.inner.wait_external()? {
                return match eval.result() {
                    Some(result) => result,
                    None => Err(Error::Stalled),
                };
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_loop_returns_immediately() {
        let lp = EventLoop::new();
        lp.run().unwrap();
    }

    #[test]
    fn test_fresh_loop_has_empty_pool() {
        let lp = EventLoop::new();
        let stats = lp.pool_stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.created, 0);
    }
}
