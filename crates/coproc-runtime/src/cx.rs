//! Scheduling context passed into every procedure body
//!
//! A body suspends only through its [`Cx`]; there is no ambient notion of
//! "the current evaluation". This keeps the suspension points visible in
//! the signature of every function that can yield control.

use std::cell::RefCell;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use coproc_core::{unit_value, Error, EvalResult, Value};

use crate::coroutine::{Coro, Resume, Yielder};
use crate::evaluation::EvalCore;
use crate::event_loop::{EventLoop, Inner};
use crate::reactor::{Interest, IoToken};
use crate::run_queue::Unit;

/// Shared slot through which a body and its caller agree on the
/// evaluation handle; filled lazily on first suspension for plain
/// non-blocking calls, eagerly for detached ones.
pub(crate) type EvalBucket = Rc<RefCell<Option<Rc<EvalCore>>>>;

/// The capability to suspend and to reach the owning event loop
///
/// Handed to a procedure body by the runtime; never constructed by user
/// code. `'y` is the lifetime of the coroutine scope the body runs in.
pub struct Cx<'a, 'y> {
    lp: Weak<Inner>,
    yielder: &'a mut Yielder<'y>,
    bucket: EvalBucket,
    coro: Weak<Coro>,
    wants_eval: bool,
}

impl<'a, 'y> Cx<'a, 'y> {
    pub(crate) fn new(
        lp: Weak<Inner>,
        yielder: &'a mut Yielder<'y>,
        bucket: EvalBucket,
        coro: Weak<Coro>,
        wants_eval: bool,
    ) -> Self {
        Self {
            lp,
            yielder,
            bucket,
            coro,
            wants_eval,
        }
    }

    /// The loop this body runs on
    pub fn event_loop(&self) -> Result<EventLoop, Error> {
        let inner = self.lp.upgrade().ok_or(Error::ShutDown)?;
        Ok(EventLoop { inner })
    }

    fn inner(&self) -> Result<Rc<Inner>, Error> {
        self.lp.upgrade().ok_or(Error::ShutDown)
    }

    /// The unit a suspension of this body registers as
    ///
    /// Materializes the evaluation handle on first use for invocation
    /// modes that promised one; fire-and-forget bodies stay bare
    /// coroutines.
    pub(crate) fn unit(&mut self) -> Result<Unit, Error> {
        if let Some(ev) = self.bucket.borrow().clone() {
            return Ok(Unit::Eval(ev));
        }
        if self.wants_eval {
            return Ok(Unit::Eval(self.ensure_eval()?));
        }
        let coro = self.coro.upgrade().ok_or(Error::ShutDown)?;
        Ok(Unit::Coro(coro))
    }

    fn ensure_eval(&mut self) -> Result<Rc<EvalCore>, Error> {
        if let Some(ev) = self.bucket.borrow().clone() {
            return Ok(ev);
        }
        let ev = EvalCore::new(self.lp.clone(), self.coro.upgrade());
        *self.bucket.borrow_mut() = Some(ev.clone());
        Ok(ev)
    }

    /// Yield to the event loop until something resumes this unit
    pub(crate) fn suspend(&mut self) -> EvalResult {
        self.yielder.suspend()
    }

    /// Suspend until somebody resumes this evaluation by hand
    ///
    /// Resolves to whatever `resume_with` delivered. The caller is
    /// responsible for arranging that resumption; a body suspended here
    /// with no live handle can never be woken.
    pub fn await_resume(&mut self) -> Result<Value, Error> {
        // Materialize the handle so the resumption has a target.
        let _ = self.unit()?;
        self.suspend()
    }

    /// Suspend for at least `duration`
    ///
    /// Resolves to the unit value when the deadline fires, or to whatever
    /// an early manual `resume_with` delivered. The leftover timer is
    /// cancelled after an early resumption.
    pub fn wait(&mut self, duration: Duration) -> Result<Value, Error> {
        let inner = self.inner()?;
        let unit = self.unit()?;
        let deadline = inner.clock.now() + duration;
        let token =
            inner
                .queue
                .schedule_after(deadline, unit.clone(), Resume::Deliver(Ok(unit_value())));
        if let Unit::Eval(ev) = &unit {
            ev.set_timer(Some(token));
        }

        let result = self.suspend();

        if let Unit::Eval(ev) = &unit {
            ev.set_timer(None);
        }
        inner.queue.cancel_scheduled(token);
        result
    }

    /// Suspend until `fd` is ready for reading
    pub fn await_readable<F: AsFd>(&mut self, fd: &F) -> Result<Value, Error> {
        self.await_io(fd.as_fd().as_raw_fd(), Interest::Readable)
    }

    /// Suspend until `fd` is ready for writing
    pub fn await_writable<F: AsFd>(&mut self, fd: &F) -> Result<Value, Error> {
        self.await_io(fd.as_fd().as_raw_fd(), Interest::Writable)
    }

    fn await_io(&mut self, fd: RawFd, interest: Interest) -> Result<Value, Error> {
        let inner = self.inner()?;
        let unit = self.unit()?;
        let token = IoToken::next();
        inner.reactor.add(token, fd, interest)?;
        inner.watches.borrow_mut().insert(token, unit.clone());
        if let Unit::Eval(ev) = &unit {
            ev.set_watch(Some(token));
        }

        let result = self.suspend();

        if let Unit::Eval(ev) = &unit {
            ev.set_watch(None);
        }
        inner.remove_watch(token);
        result
    }
}
