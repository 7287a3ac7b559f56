//! Procedures and their invocation modes
//!
//! A [`Procedure`] is a reusable body; each invocation acquires a pooled
//! coroutine and produces (at most) one evaluation. Four modes exist:
//!
//! - [`call`](Procedure::call): synchronous bridge, drives the loop until
//!   the body concludes
//! - [`call_from`](Procedure::call_from): from inside another body,
//!   suspends the caller instead of the thread
//! - [`call_nonblock`](Procedure::call_nonblock): runs the body up to its
//!   first suspension; returns the result directly if it never suspends
//! - [`call_detached`](Procedure::call_detached) /
//!   [`call_and_forget`](Procedure::call_and_forget): queue the body for
//!   the next loop turn, with or without a handle
//!
//! The evaluation handle is materialized lazily: a body that never
//! suspends never allocates one.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use coproc_core::value::downcast;
use coproc_core::{Error, Value};

use crate::coroutine::{Coro, Resume, Step, Task};
use crate::cx::{Cx, EvalBucket};
use crate::evaluation::{EvalCore, Evaluation};
use crate::event_loop::{EventLoop, Inner};
use crate::run_queue::Unit;

/// Outcome of a non-blocking call: either the body finished on the
/// caller's stack, or it suspended and left a handle
pub enum Called<T> {
    Ready(Rc<T>),
    Pending(Evaluation<T>),
}

/// A reusable, invocable unit of cooperative work
pub struct Procedure<A, T> {
    body: Rc<dyn Fn(&mut Cx<'_, '_>, A) -> Result<T, Error>>,
}

impl<A, T> Clone for Procedure<A, T> {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
        }
    }
}

impl<A: 'static, T: Any> Procedure<A, T> {
    pub fn new(body: impl Fn(&mut Cx<'_, '_>, A) -> Result<T, Error> + 'static) -> Self {
        Self {
            body: Rc::new(body),
        }
    }

    /// Invoke synchronously from outside the loop
    ///
    /// Runs the body immediately; if it suspends, drives `lp` until the
    /// evaluation settles. Body errors (and cancellation) re-raise here.
    pub fn call(&self, lp: &EventLoop, args: A) -> Result<Rc<T>, Error> {
        match self.call_nonblock(lp, args)? {
            Called::Ready(value) => Ok(value),
            Called::Pending(ev) => lp.run_until(&ev),
        }
    }

    /// Invoke from inside another body
    ///
    /// Runs the body immediately; if it suspends, the *caller* suspends
    /// until it concludes, never the thread.
    pub fn call_from(&self, cx: &mut Cx<'_, '_>, args: A) -> Result<Rc<T>, Error> {
        let lp = cx.event_loop()?;
        match self.call_nonblock(&lp, args)? {
            Called::Ready(value) => Ok(value),
            Called::Pending(ev) => ev.await_result(cx),
        }
    }

    /// Invoke without blocking the caller
    ///
    /// The body runs on the caller's stack up to its first suspension
    /// point. A body that never suspends yields [`Called::Ready`] and no
    /// evaluation is ever allocated; one that does yields
    /// [`Called::Pending`] with the handle. Immediate body errors
    /// re-raise here.
    pub fn call_nonblock(&self, lp: &EventLoop, args: A) -> Result<Called<T>, Error> {
        let inner = &lp.inner;
        let coro = inner.pool.acquire();
        let bucket: EvalBucket = Rc::new(RefCell::new(None));
        let task = self.task(
            Rc::downgrade(inner),
            bucket.clone(),
            Rc::downgrade(&coro),
            true,
            args,
        );

        match coro.resume(Resume::Start(task))? {
            Step::Done(result) => {
                inner.pool.release(coro);
                // No evaluation was ever materialized, so the call site is
                // the only observer besides the loop-global callbacks.
                if bucket.borrow().is_none() {
                    if let Err(err) = &result {
                        inner.hooks.trigger(err);
                    }
                }
                let value = result?;
                Ok(Called::Ready(downcast(value)?))
            }
            Step::Yielded => {
                let ev = bucket
                    .borrow()
                    .clone()
                    .ok_or_else(|| Error::failed("body suspended without an evaluation"))?;
                trace!(eval = ev.id().raw(), "call suspended");
                Ok(Called::Pending(Evaluation::from_core(ev)))
            }
            Step::Parked => Err(Error::failed("coroutine parked before running its body")),
        }
    }

    /// Queue the body for the next loop turn and return its handle
    ///
    /// The body has not run at all when this returns; its evaluation
    /// exists eagerly and can be cancelled, awaited or concluded before
    /// its first turn. A manual `resume` before that turn reports
    /// [`Error::AlreadyScheduled`], since the start itself is the queued
    /// resumption.
    pub fn call_detached(&self, lp: &EventLoop, args: A) -> Evaluation<T> {
        let inner = &lp.inner;
        let coro = inner.pool.acquire();
        let ev = EvalCore::new(Rc::downgrade(inner), Some(coro.clone()));
        let bucket: EvalBucket = Rc::new(RefCell::new(Some(ev.clone())));
        let task = self.task(
            Rc::downgrade(inner),
            bucket,
            Rc::downgrade(&coro),
            true,
            args,
        );
        inner
            .queue
            .schedule_immediately(Unit::Eval(ev.clone()), Resume::Start(task));
        Evaluation::from_core(ev)
    }

    /// Queue the body for the next loop turn with no handle at all
    ///
    /// The cheapest mode: the coroutine stays a bare unit even across
    /// suspensions. The result is discarded; errors reach only the
    /// loop-global callbacks.
    pub fn call_and_forget(&self, lp: &EventLoop, args: A) {
        let inner = &lp.inner;
        let coro = inner.pool.acquire();
        let bucket: EvalBucket = Rc::new(RefCell::new(None));
        let task = self.task(
            Rc::downgrade(inner),
            bucket,
            Rc::downgrade(&coro),
            false,
            args,
        );
        inner
            .queue
            .schedule_immediately(Unit::Coro(coro), Resume::Start(task));
    }

    /// Package one invocation for the coroutine trampoline
    ///
    /// The closure owns weak references only; a strong `Rc<Coro>` here
    /// would sit on the coroutine's own stack and keep it alive forever.
    fn task(
        &self,
        lp: Weak<Inner>,
        bucket: EvalBucket,
        coro: Weak<Coro>,
        wants_eval: bool,
        args: A,
    ) -> Task {
        let body = self.body.clone();
        Task {
            run: Box::new(move |yielder| {
                let mut cx = Cx::new(lp.clone(), yielder, bucket.clone(), coro, wants_eval);
                let result = body(&mut cx, args).map(|value| Rc::new(value) as Value);
                // A panic unwinds past this point, so settling cannot live
                // only here; whoever receives the `Done` step settles (or
                // reports) outcomes this line never saw.
                let eval = bucket.borrow().clone();
                if let Some(ev) = eval {
                    ev.conclude_from_body(result.clone());
                }
                result
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn test_call_returns_ready_result() {
        let lp = EventLoop::new();
        let double = Procedure::new(|_cx, n: i32| -> Result<i32, Error> {
            Ok(n * 2)
        });
        assert_eq!(*double.call(&lp, 13).unwrap(), 26);
    }

    #[test]
    fn test_call_drives_suspending_body() {
        let lp = EventLoop::new();
        let nap = Procedure::new(|cx, ()| -> Result<&'static str, Error> {
            cx.wait(Duration::from_millis(5))?;
            Ok("rested")
        });
        assert_eq!(*nap.call(&lp, ()).unwrap(), "rested");
    }

    #[test]
    fn test_call_nonblock_ready_when_body_never_suspends() {
        let lp = EventLoop::new();
        let p = Procedure::new(|_cx, ()| -> Result<i32, Error> { Ok(7) });
        match p.call_nonblock(&lp, ()).unwrap() {
            Called::Ready(v) => assert_eq!(*v, 7),
            Called::Pending(_) => panic!("body never suspends"),
        }
    }

    #[test]
    fn test_call_nonblock_pending_then_run_until() {
        let lp = EventLoop::new();
        let nap = Procedure::new(|cx, ()| -> Result<i32, Error> {
            cx.wait(Duration::from_millis(1))?;
            Ok(99)
        });
        match nap.call_nonblock(&lp, ()).unwrap() {
            Called::Pending(ev) => {
                assert!(ev.pending());
                assert_eq!(*lp.run_until(&ev).unwrap(), 99);
                assert!(ev.concluded());
            }
            Called::Ready(_) => panic!("expected a suspension"),
        }
    }

    #[test]
    fn test_detached_runs_only_once_the_loop_turns() {
        let lp = EventLoop::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let p = Procedure::new(move |_cx, ()| -> Result<(), Error> {
            flag.set(true);
            Ok(())
        });

        let ev = p.call_detached(&lp, ());
        assert!(!ran.get());
        assert!(ev.pending());

        lp.run().unwrap();
        assert!(ran.get());
        assert!(ev.concluded());
    }

    #[test]
    fn test_detached_cancel_before_first_turn() {
        let lp = EventLoop::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let p = Procedure::new(move |_cx, ()| -> Result<(), Error> {
            flag.set(true);
            Ok(())
        });

        let ev = p.call_detached(&lp, ());
        ev.cancel().unwrap();
        lp.run().unwrap();

        assert!(!ran.get());
        assert!(ev.cancelled());
        // Second cancel is a no-op, not an error.
        assert!(ev.cancel().is_ok());
    }

    #[test]
    fn test_immediate_error_raises_at_call_site() {
        let lp = EventLoop::new();
        let boom = Procedure::new(|_cx, ()| -> Result<(), Error> {
            Err(Error::failed("exploded"))
        });
        let err = boom.call(&lp, ()).unwrap_err();
        assert!(matches!(err, Error::Failed(_)));
    }

    #[test]
    fn test_forget_error_reaches_global_hook() {
        let lp = EventLoop::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        lp.on_error(move |e| sink.borrow_mut().push(e.to_string()));

        let boom = Procedure::new(|_cx, ()| -> Result<(), Error> {
            Err(Error::failed("exploded"))
        });
        boom.call_and_forget(&lp, ());
        assert!(seen.borrow().is_empty());

        lp.run().unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("exploded"));
    }

    #[test]
    fn test_detached_panic_settles_evaluation_and_fires_hook() {
        let lp = EventLoop::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        lp.on_error(move |e| sink.borrow_mut().push(e.to_string()));

        let wedge = Procedure::new(|cx, ()| -> Result<(), Error> {
            cx.wait(Duration::from_millis(1))?;
            panic!("wedged");
        });
        let ev = wedge.call_detached(&lp, ());
        lp.run().unwrap();

        assert!(ev.concluded());
        match ev.result() {
            Some(Err(Error::Failed(msg))) => assert!(msg.contains("wedged")),
            other => panic!("expected a stored body error, got {other:?}"),
        }
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_cancel_after_panicked_body_leaves_pool_intact() {
        let lp = EventLoop::new();
        let wedge = Procedure::new(|_cx, ()| -> Result<(), Error> {
            panic!("wedged");
        });
        let ev = wedge.call_detached(&lp, ());
        lp.run().unwrap();

        // Already concluded (with the panic error), so cancelling reports
        // that instead of tearing anything down a second time.
        assert!(matches!(ev.cancel(), Err(Error::Concluded)));
        assert_eq!(lp.pool_stats().idle, 1);

        // The released coroutine is still usable.
        let p = Procedure::new(|_cx, ()| -> Result<i32, Error> { Ok(5) });
        assert_eq!(*p.call(&lp, ()).unwrap(), 5);
        assert_eq!(lp.pool_stats().created, 1);
    }

    #[test]
    fn test_forget_panic_reaches_global_hook() {
        let lp = EventLoop::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        lp.on_error(move |e| sink.borrow_mut().push(e.to_string()));

        let wedge = Procedure::new(|_cx, ()| -> Result<(), Error> {
            panic!("wedged");
        });
        wedge.call_and_forget(&lp, ());
        lp.run().unwrap();

        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("wedged"));
    }

    #[test]
    fn test_pool_reuses_coroutines_across_calls() {
        let lp = EventLoop::new();
        let p = Procedure::new(|_cx, ()| -> Result<(), Error> { Ok(()) });
        p.call(&lp, ()).unwrap();
        p.call(&lp, ()).unwrap();
        p.call(&lp, ()).unwrap();

        let stats = lp.pool_stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 2);
        assert_eq!(stats.idle, 1);
    }
}
