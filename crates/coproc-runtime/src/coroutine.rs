//! Pooled stackful coroutine wrapper
//!
//! Each [`Coro`] owns one scoped generator from the `generator` crate whose
//! trampoline loops forever: park in the pool, receive a procedure body,
//! run it to completion (through any number of suspensions), yield the
//! outcome, park again. The stack is therefore reused across unrelated
//! evaluations without being torn down.
//!
//! # Resume protocol
//!
//! A coroutine is driven exclusively through [`Resume`] messages and
//! answers with [`Step`]s:
//!
//! - `Start(task)` is only valid while idle and begins a new body
//! - `Deliver(result)` is only valid while suspended and becomes the return
//!   value of the suspension primitive the body is blocked in
//! - `Cancel` is only valid while suspended and unwinds the body without
//!   running its remainder, via a dedicated panic payload recognized by the
//!   trampoline (never a value that could collide with user data)
//!
//! Driving a coroutine in any other state is protocol misuse and fails
//! loudly with [`Error::NotSuspended`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use generator::{Gn, LocalGenerator, Scope};
use tracing::trace;

use coproc_core::{CoroId, CoroState, Error, EvalResult};

/// Stack size handed to the generator for every pooled coroutine
const COROUTINE_STACK_SIZE: usize = 0x8000;

/// Control message sent into a coroutine
pub(crate) enum Resume {
    /// Begin a new procedure body (idle coroutines only)
    Start(Task),
    /// Return from the current suspension point with this result
    Deliver(EvalResult),
    /// Unwind the current body without running its remainder
    Cancel,
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resume::Start(_) => write!(f, "Start(..)"),
            Resume::Deliver(Ok(_)) => write!(f, "Deliver(Ok(..))"),
            Resume::Deliver(Err(e)) => write!(f, "Deliver(Err({e:?}))"),
            Resume::Cancel => write!(f, "Cancel"),
        }
    }
}

/// What a coroutine yields back to whoever resumed it
pub(crate) enum Step {
    /// Idle again, waiting for the next `Start`
    Parked,
    /// The body hit a suspension point; its resumption has been arranged
    Yielded,
    /// The body finished (or was unwound) with this outcome
    Done(EvalResult),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Parked => write!(f, "Parked"),
            Step::Yielded => write!(f, "Yielded"),
            Step::Done(Ok(_)) => write!(f, "Done(Ok(..))"),
            Step::Done(Err(e)) => write!(f, "Done(Err({e:?}))"),
        }
    }
}

/// One seeded invocation: the erased body plus everything it captured
pub(crate) struct Task {
    pub(crate) run: Box<dyn FnOnce(&mut Yielder<'_>) -> EvalResult>,
}

/// Unwind payload used to cancel a suspended body
///
/// Kept private to this module so no body code can forge or swallow it
/// without going through [`Yielder::suspend`].
struct CancelUnwind;

/// Lifetime-erased view of one generator scope
///
/// The concrete scope type carries the generator's two lifetimes; erasing
/// them here keeps [`Yielder`] (and the context built on it) at a single
/// borrow lifetime.
trait YieldScope {
    fn switch(&mut self, step: Step) -> Option<Resume>;
}

impl<'g, 's> YieldScope for Scope<'g, 's, Resume, Step> {
    fn switch(&mut self, step: Step) -> Option<Resume> {
        self.yield_with(step);
        self.get_yield()
    }
}

/// The suspension side of the resume protocol, handed to running bodies
///
/// Borrowing the generator scope mutably guarantees at most one suspension
/// point is armed at a time.
pub struct Yielder<'a> {
    scope: &'a mut dyn YieldScope,
}

impl Yielder<'_> {
    /// Yield control and block until a `Deliver` or `Cancel` arrives
    ///
    /// Returns the delivered result; on `Cancel` this never returns and
    /// unwinds to the trampoline instead.
    pub(crate) fn suspend(&mut self) -> EvalResult {
        match self.scope.switch(Step::Yielded) {
            Some(Resume::Deliver(result)) => result,
            Some(Resume::Start(_)) => {
                Err(Error::failed("coroutine restarted while suspended"))
            }
            // No payload means the generator is being torn down.
            Some(Resume::Cancel) | None => {
                panic::resume_unwind(Box::new(CancelUnwind))
            }
        }
    }
}

/// A reusable stackful execution context
pub(crate) struct Coro {
    id: CoroId,
    state: Cell<CoroState>,
    gen: RefCell<LocalGenerator<'static, Resume, Step>>,
}

impl Coro {
    /// Create a coroutine and run its trampoline to the first parking point
    pub(crate) fn new() -> Rc<Self> {
        let mut gen = Gn::<Resume>::new_scoped_opt_local::<Step, _>(
            COROUTINE_STACK_SIZE,
            |mut scope| {
                scope.yield_with(Step::Parked);
                let mut incoming = scope.get_yield();
                loop {
                    let step = match incoming {
                        Some(Resume::Start(task)) => {
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                let mut yielder = Yielder { scope: &mut scope };
                                (task.run)(&mut yielder)
                            }));
                            match outcome {
                                Ok(result) => Step::Done(result),
                                Err(payload) => {
                                    if payload.is::<CancelUnwind>() {
                                        Step::Done(Err(Error::Cancelled))
                                    } else if payload.is::<generator::Error>() {
                                        // The generator itself is unwinding
                                        // (dropped mid-suspension); let it.
                                        panic::resume_unwind(payload)
                                    } else {
                                        Step::Done(Err(Error::from_panic(payload)))
                                    }
                                }
                            }
                        }
                        // Cancelled or poked before a body was assigned.
                        Some(Resume::Cancel) | Some(Resume::Deliver(_)) | None => Step::Parked,
                    };
                    scope.yield_with(step);
                    incoming = scope.get_yield();
                }
            },
        );

        // Run the trampoline up to its first parking yield so the first
        // `Start` lands in the loop, not in generator setup.
        let _ = gen.resume();

        let id = CoroId::next();
        trace!(coro = id.raw(), "coroutine created");
        Rc::new(Self {
            id,
            state: Cell::new(CoroState::Idle),
            gen: RefCell::new(gen),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> CoroId {
        self.id
    }

    #[inline]
    pub(crate) fn state(&self) -> CoroState {
        self.state.get()
    }

    /// Transfer control into the coroutine
    ///
    /// Validates the resume protocol first: `Start` requires an idle
    /// coroutine, `Deliver`/`Cancel` require a suspended one. Anything else
    /// is a programmer error reported to the caller instead of corrupting
    /// the coroutine.
    pub(crate) fn resume(&self, message: Resume) -> Result<Step, Error> {
        let valid = match (self.state.get(), &message) {
            (CoroState::Idle, Resume::Start(_)) => true,
            (CoroState::Suspended, Resume::Deliver(_)) => true,
            (CoroState::Suspended, Resume::Cancel) => true,
            _ => false,
        };
        if !valid {
            return Err(Error::NotSuspended);
        }

        self.state.set(CoroState::Running);
        let step = self.gen.borrow_mut().send(message);
        self.state.set(match step {
            Step::Yielded => CoroState::Suspended,
            Step::Parked | Step::Done(_) => CoroState::Idle,
        });
        trace!(coro = self.id.raw(), state = ?self.state.get(), "coroutine yielded");
        Ok(step)
    }

    /// Unwind a suspended body without running its remainder
    ///
    /// No-op on an idle coroutine (already finished or never started).
    pub(crate) fn cancel(&self) -> Result<(), Error> {
        match self.state.get() {
            CoroState::Idle => Ok(()),
            CoroState::Suspended => match self.resume(Resume::Cancel)? {
                Step::Done(_) | Step::Parked => Ok(()),
                Step::Yielded => Err(Error::failed("coroutine suspended during cancellation")),
            },
            CoroState::Running => Err(Error::NotSuspended),
        }
    }
}
