//! Evaluation: the handle to one in-flight or settled invocation
//!
//! [`EvalCore`] is the type-erased heart shared by the run queue, the
//! waiters and every public handle; [`Evaluation`] is the typed wrapper
//! users hold. The core enforces the write-once rule: once concluded or
//! cancelled, the phase and stored outcome never change again.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::debug;

use coproc_core::value::downcast;
use coproc_core::{unit_value, Error, EvalId, EvalPhase, EvalResult, Hooks, Value};

use crate::coroutine::{Coro, Resume, Step};
use crate::cx::Cx;
use crate::event_loop::Inner;
use crate::reactor::IoToken;
use crate::run_queue::{TimerToken, Unit};

/// Type-erased state of one invocation
pub(crate) struct EvalCore {
    id: EvalId,
    lp: Weak<Inner>,
    phase: Cell<EvalPhase>,
    /// Result or error, written exactly once when the phase settles
    outcome: RefCell<Option<EvalResult>>,
    /// Back-reference to the coroutine driving this evaluation; cleared on
    /// settling. The pool owns the coroutine, this never does.
    coro: RefCell<Option<Rc<Coro>>>,
    /// Units blocked in `await_result` on this evaluation
    waiters: RefCell<Vec<Unit>>,
    /// A resumption for this evaluation sits in the immediate queue
    scheduled: Cell<bool>,
    /// Pending delayed entry (a `wait` in progress), cancelled on settling
    timer: Cell<Option<TimerToken>>,
    /// Pending reactor registration, deregistered on settling
    watch: Cell<Option<IoToken>>,
    /// Instance-level `:error` callbacks
    hooks: Hooks,
}

impl EvalCore {
    pub(crate) fn new(lp: Weak<Inner>, coro: Option<Rc<Coro>>) -> Rc<Self> {
        Rc::new(Self {
            id: EvalId::next(),
            lp,
            phase: Cell::new(EvalPhase::Pending),
            outcome: RefCell::new(None),
            coro: RefCell::new(coro),
            waiters: RefCell::new(Vec::new()),
            scheduled: Cell::new(false),
            timer: Cell::new(None),
            watch: Cell::new(None),
            hooks: Hooks::new(),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> EvalId {
        self.id
    }

    #[inline]
    pub(crate) fn phase(&self) -> EvalPhase {
        self.phase.get()
    }

    /// Mark a resumption as queued; returns whether one already was
    #[inline]
    pub(crate) fn mark_scheduled(&self) -> bool {
        self.scheduled.replace(true)
    }

    #[inline]
    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.set(false);
    }

    #[inline]
    pub(crate) fn coro(&self) -> Option<Rc<Coro>> {
        self.coro.borrow().clone()
    }

    #[inline]
    pub(crate) fn set_timer(&self, token: Option<TimerToken>) {
        self.timer.set(token);
    }

    #[inline]
    pub(crate) fn set_watch(&self, token: Option<IoToken>) {
        self.watch.set(token);
    }

    #[inline]
    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// The stored result, once settled
    pub(crate) fn settled_result(&self) -> Option<EvalResult> {
        self.outcome.borrow().clone()
    }

    /// Block the calling body until this evaluation settles
    pub(crate) fn await_result(self: &Rc<Self>, cx: &mut Cx<'_, '_>) -> EvalResult {
        if let Some(result) = self.settled_result() {
            return result;
        }
        let unit = cx.unit()?;
        if let Unit::Eval(waiter) = &unit {
            if Rc::ptr_eq(waiter, self) {
                return Err(Error::failed("evaluation cannot await its own result"));
            }
        }
        self.waiters.borrow_mut().push(unit.clone());
        let result = cx.suspend();
        // If the wakeup came from somewhere else (a manual resume of the
        // waiter), drop the stale registration so a later conclusion does
        // not deliver into an unrelated suspension point.
        if self.phase.get().is_pending() {
            self.waiters.borrow_mut().retain(|w| !w.is_same(&unit));
        }
        result
    }

    /// Manually queue a resumption delivering `value`
    ///
    /// Fails if a resumption is already queued, or if the evaluation has
    /// settled.
    pub(crate) fn resume_value(self: &Rc<Self>, value: Value) -> Result<(), Error> {
        match self.phase.get() {
            EvalPhase::Concluded => Err(Error::Concluded),
            EvalPhase::Cancelled => Err(Error::Cancelled),
            EvalPhase::Pending => {
                if self.scheduled.get() {
                    return Err(Error::AlreadyScheduled);
                }
                let inner = self.lp.upgrade().ok_or(Error::ShutDown)?;
                inner
                    .queue
                    .schedule_immediately(Unit::Eval(self.clone()), Resume::Deliver(Ok(value)));
                Ok(())
            }
        }
    }

    /// Force-conclude with a result or error, unwinding a still-pending body
    pub(crate) fn conclude(self: &Rc<Self>, result: EvalResult) -> Result<(), Error> {
        match self.phase.get() {
            EvalPhase::Concluded => Err(Error::Concluded),
            EvalPhase::Cancelled => Err(Error::Cancelled),
            EvalPhase::Pending => self.settle(EvalPhase::Concluded, result, true),
        }
    }

    /// Terminate without a result; idempotent on an already-cancelled
    /// evaluation
    pub(crate) fn cancel(self: &Rc<Self>) -> Result<(), Error> {
        match self.phase.get() {
            EvalPhase::Concluded => Err(Error::Concluded),
            EvalPhase::Cancelled => Ok(()),
            EvalPhase::Pending => self.settle(EvalPhase::Cancelled, Err(Error::Cancelled), true),
        }
    }

    /// Conclusion path taken when the body itself finishes
    ///
    /// A no-op if the evaluation was force-settled mid-body; the late
    /// result is discarded.
    pub(crate) fn conclude_from_body(self: &Rc<Self>, result: EvalResult) {
        if self.phase.get().is_settled() {
            return;
        }
        let _ = self.settle(EvalPhase::Concluded, result, false);
    }

    /// Common settling machinery
    ///
    /// Stores the outcome, cancels pending timer/watch registrations,
    /// wakes every waiter with the delivered result, fires `:error`
    /// callbacks for erroring conclusions, and tears down the coroutine.
    /// `unwind` is false when the coroutine is the one calling (it is
    /// still running and will return on its own).
    fn settle(
        self: &Rc<Self>,
        phase: EvalPhase,
        result: EvalResult,
        unwind: bool,
    ) -> Result<(), Error> {
        let inner = self.lp.upgrade().ok_or(Error::ShutDown)?;

        self.phase.set(phase);
        *self.outcome.borrow_mut() = Some(result.clone());
        debug!(eval = self.id.raw(), phase = %phase, "evaluation settled");

        if let Some(token) = self.timer.take() {
            inner.queue.cancel_scheduled(token);
        }
        if let Some(token) = self.watch.take() {
            inner.remove_watch(token);
        }

        for waiter in self.waiters.borrow_mut().drain(..) {
            inner
                .queue
                .schedule_immediately(waiter, Resume::Deliver(result.clone()));
        }

        // Cancellation is not a body error; only erroring conclusions
        // reach the callbacks.
        if phase == EvalPhase::Concluded {
            if let Err(err) = &result {
                inner.hooks.trigger(err);
                self.hooks.trigger(err);
            }
        }

        let taken = self.coro.borrow_mut().take();
        if let Some(coro) = taken {
            match coro.state() {
                state if state.is_suspended() && unwind => match coro.resume(Resume::Cancel) {
                    Ok(Step::Done(_)) | Ok(Step::Parked) => inner.pool.release(coro),
                    Ok(Step::Yielded) | Err(_) => {
                        debug!(eval = self.id.raw(), "coroutine did not unwind cleanly");
                    }
                },
                // Never started (e.g. a detached call cancelled before its
                // first turn): nothing to unwind.
                state if state.is_idle() => inner.pool.release(coro),
                // Running: the body is settling itself; whoever resumed it
                // releases the coroutine when it returns.
                _ => {}
            }
        }
        Ok(())
    }
}

/// Typed public handle to one invocation
pub struct Evaluation<T> {
    core: Rc<EvalCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Evaluation<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Any> Evaluation<T> {
    pub(crate) fn from_core(core: Rc<EvalCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    /// Identity of this invocation; never reused
    pub fn id(&self) -> EvalId {
        self.core.id()
    }

    /// Retrieve the result, suspending the calling body until it exists
    ///
    /// Re-raises a stored body error; raises [`Error::Cancelled`] if the
    /// evaluation was cancelled. This is the sole blocking retrieval
    /// primitive; from outside the loop use
    /// [`EventLoop::run_until`](crate::event_loop::EventLoop::run_until).
    pub fn await_result(&self, cx: &mut Cx<'_, '_>) -> Result<Rc<T>, Error> {
        downcast(self.core.await_result(cx)?)
    }

    /// Peek at the result without blocking; `None` while pending
    pub fn result(&self) -> Option<Result<Rc<T>, Error>> {
        self.core
            .settled_result()
            .map(|r| r.and_then(downcast::<T>))
    }

    /// Manually resume the suspended body with no payload
    pub fn resume(&self) -> Result<(), Error> {
        self.core.resume_value(unit_value())
    }

    /// Manually resume the suspended body; `value` becomes the return
    /// value of the suspension primitive it is blocked in
    ///
    /// Fails with [`Error::AlreadyScheduled`] if a resumption is already
    /// queued.
    pub fn resume_with<V: Any>(&self, value: V) -> Result<(), Error> {
        self.core.resume_value(Rc::new(value))
    }

    /// Force-conclude with the given result or error
    ///
    /// If the body is still pending it is unwound without running its
    /// remainder; waiters observe `result` as if the body had produced it.
    pub fn conclude(&self, result: Result<T, Error>) -> Result<(), Error> {
        self.core.conclude(result.map(|v| Rc::new(v) as Value))
    }

    /// Terminate before conclusion; waiters observe [`Error::Cancelled`]
    pub fn cancel(&self) -> Result<(), Error> {
        self.core.cancel()
    }

    /// Check if a result or error is stored
    pub fn concluded(&self) -> bool {
        self.core.phase() == EvalPhase::Concluded
    }

    /// Check if the evaluation was cancelled
    pub fn cancelled(&self) -> bool {
        self.core.phase() == EvalPhase::Cancelled
    }

    /// Check if the body may still run
    pub fn pending(&self) -> bool {
        self.core.phase().is_pending()
    }

    /// Register an instance-level `:error` callback
    ///
    /// Runs after the loop-global callbacks if this evaluation concludes
    /// with an error.
    pub fn on_error(&self, f: impl Fn(&Error) + 'static) {
        self.core.hooks().on_error(f);
    }
}
