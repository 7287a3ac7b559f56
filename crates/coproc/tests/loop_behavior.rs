//! End-to-end behavior of procedures, evaluations and the event loop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use coproc::{downcast, Called, Error, EventLoop, ManualClock, NullReactor, Procedure};

#[test]
fn sync_call_returns_the_body_result() {
    let lp = EventLoop::new();
    let add = Procedure::new(|_cx, (a, b): (i32, i32)| -> Result<i32, Error> { Ok(a + b) });
    assert_eq!(*add.call(&lp, (6, 7)).unwrap(), 13);
}

#[test]
fn nonblock_is_ready_iff_the_body_never_suspends() {
    let lp = EventLoop::new();

    let instant = Procedure::new(|_cx, ()| -> Result<i32, Error> { Ok(1) });
    assert!(matches!(
        instant.call_nonblock(&lp, ()).unwrap(),
        Called::Ready(_)
    ));

    let napping = Procedure::new(|cx, ()| -> Result<i32, Error> {
        cx.wait(Duration::from_millis(1))?;
        Ok(2)
    });
    match napping.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => assert_eq!(*lp.run_until(&ev).unwrap(), 2),
        Called::Ready(_) => panic!("a waiting body must suspend"),
    }
}

#[test]
fn wait_suspends_for_at_least_the_duration() {
    let lp = EventLoop::new();
    let nap = Procedure::new(|cx, d: Duration| -> Result<(), Error> {
        cx.wait(d)?;
        Ok(())
    });

    let start = Instant::now();
    nap.call(&lp, Duration::from_millis(20)).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn detached_evaluations_interleave_by_deadline() {
    let lp = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let log = order.clone();
    let napper = Procedure::new(move |cx, (name, ms): (&'static str, u64)| -> Result<(), Error> {
        cx.wait(Duration::from_millis(ms))?;
        log.borrow_mut().push(name);
        Ok(())
    });

    napper.call_detached(&lp, ("slow", 30));
    napper.call_detached(&lp, ("fast", 5));
    lp.run().unwrap();

    assert_eq!(*order.borrow(), vec!["fast", "slow"]);
}

#[test]
fn call_from_suspends_the_caller_not_the_thread() {
    let lp = EventLoop::new();

    let child = Procedure::new(|cx, ()| -> Result<i32, Error> {
        cx.wait(Duration::from_millis(5))?;
        Ok(21)
    });
    let parent = Procedure::new(move |cx, ()| -> Result<i32, Error> {
        let half = child.call_from(cx, ())?;
        Ok(*half * 2)
    });

    assert_eq!(*parent.call(&lp, ()).unwrap(), 42);
}

#[test]
fn await_result_shares_one_outcome_with_every_waiter() {
    let lp = EventLoop::new();

    let source = Procedure::new(|cx, ()| -> Result<i32, Error> {
        cx.wait(Duration::from_millis(5))?;
        Ok(7)
    });
    let ev = source.call_detached(&lp, ());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let waiter = {
        let ev = ev.clone();
        let seen = seen.clone();
        Procedure::new(move |cx, tag: i32| -> Result<(), Error> {
            let v = ev.await_result(cx)?;
            seen.borrow_mut().push((tag, *v));
            Ok(())
        })
    };
    waiter.call_detached(&lp, 1);
    waiter.call_detached(&lp, 2);

    lp.run().unwrap();
    assert_eq!(*seen.borrow(), vec![(1, 7), (2, 7)]);
}

#[test]
fn manual_resume_delivers_a_value_and_rejects_double_scheduling() {
    let lp = EventLoop::new();
    let p = Procedure::new(|cx, ()| -> Result<i32, Error> {
        let v = cx.await_resume()?;
        Ok(*downcast::<i32>(v)?)
    });

    let ev = match p.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => ev,
        Called::Ready(_) => panic!("expected a suspension"),
    };

    ev.resume_with(42).unwrap();
    assert!(matches!(
        ev.resume_with(43).unwrap_err(),
        Error::AlreadyScheduled
    ));

    assert_eq!(*lp.run_until(&ev).unwrap(), 42);
    // Settled evaluations reject further resumptions.
    assert!(matches!(ev.resume().unwrap_err(), Error::Concluded));
}

#[test]
fn early_resume_of_a_wait_cancels_the_leftover_timer() {
    let lp = EventLoop::new();
    let p = Procedure::new(|cx, ()| -> Result<i32, Error> {
        let v = cx.wait(Duration::from_secs(3600))?;
        Ok(*downcast::<i32>(v)?)
    });

    let ev = match p.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => ev,
        Called::Ready(_) => panic!("expected a suspension"),
    };
    ev.resume_with(5).unwrap();

    let start = Instant::now();
    assert_eq!(*lp.run_until(&ev).unwrap(), 5);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn conclude_mid_flight_discards_the_body_remainder() {
    let lp = EventLoop::new();
    let reached_end = Rc::new(Cell::new(false));

    let flag = reached_end.clone();
    let slow = Procedure::new(move |cx, ()| -> Result<i32, Error> {
        cx.wait(Duration::from_secs(3600))?;
        flag.set(true);
        Ok(1)
    });

    let ev = match slow.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => ev,
        Called::Ready(_) => panic!("expected a suspension"),
    };
    ev.conclude(Ok(99)).unwrap();

    assert!(ev.concluded());
    assert_eq!(*lp.run_until(&ev).unwrap(), 99);
    assert!(!reached_end.get());
    assert!(matches!(ev.conclude(Ok(1)).unwrap_err(), Error::Concluded));
}

#[test]
fn cancelling_a_source_cancels_its_waiters() {
    let lp = EventLoop::new();

    let forever = Procedure::new(|cx, ()| -> Result<i32, Error> {
        cx.wait(Duration::from_secs(3600))?;
        Ok(0)
    });
    let ev_a = forever.call_detached(&lp, ());

    let waiter = {
        let ev_a = ev_a.clone();
        Procedure::new(move |cx, ()| -> Result<i32, Error> { Ok(*ev_a.await_result(cx)?) })
    };
    let ev_b = waiter.call_detached(&lp, ());

    ev_a.cancel().unwrap();
    let err = lp.run_until(&ev_b).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(ev_a.cancelled());
}

#[test]
fn stalled_loop_is_reported_instead_of_hanging() {
    let lp = EventLoop::new();
    let p = Procedure::new(|cx, ()| -> Result<(), Error> {
        cx.await_resume()?;
        Ok(())
    });
    let ev = match p.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => ev,
        Called::Ready(_) => panic!("expected a suspension"),
    };
    assert!(matches!(lp.run_until(&ev).unwrap_err(), Error::Stalled));
}

#[test]
fn error_hooks_fire_global_first_then_instance() {
    let lp = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let log = order.clone();
    lp.on_error(move |_| log.borrow_mut().push("global"));

    let boom = Procedure::new(|_cx, ()| -> Result<(), Error> { Err(Error::failed("nope")) });
    let ev = boom.call_detached(&lp, ());
    let log = order.clone();
    ev.on_error(move |_| log.borrow_mut().push("instance"));

    lp.run().unwrap();
    assert_eq!(*order.borrow(), vec!["global", "instance"]);
    assert!(matches!(ev.result(), Some(Err(Error::Failed(_)))));
}

#[test]
fn cancellation_does_not_fire_error_hooks() {
    let lp = EventLoop::new();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    lp.on_error(move |_| flag.set(true));

    let forever = Procedure::new(|cx, ()| -> Result<(), Error> {
        cx.wait(Duration::from_secs(3600))?;
        Ok(())
    });
    let ev = match forever.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => ev,
        Called::Ready(_) => panic!("expected a suspension"),
    };
    ev.cancel().unwrap();

    assert!(!fired.get());
    assert!(matches!(lp.run_until(&ev).unwrap_err(), Error::Cancelled));
}

#[test]
fn readable_descriptor_wakes_the_suspended_body() {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    let lp = EventLoop::new();
    let (mut tx, rx) = UnixStream::pair().unwrap();
    tx.write_all(b"ping").unwrap();

    let rx = Rc::new(rx);
    let reader = {
        let rx = rx.clone();
        Procedure::new(move |cx, ()| -> Result<Vec<u8>, Error> {
            cx.await_readable(&*rx)?;
            let mut buf = [0u8; 16];
            let n = (&*rx).read(&mut buf).map_err(Error::from)?;
            Ok(buf[..n].to_vec())
        })
    };

    let got = reader.call(&lp, ()).unwrap();
    assert_eq!(&*got, b"ping");
}

#[test]
fn cancelling_an_io_wait_unregisters_the_descriptor() {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    let lp = EventLoop::new();
    let (tx, rx) = UnixStream::pair().unwrap();
    tx.set_nonblocking(true).unwrap();

    // Fill the pipe so a writability wait actually suspends.
    let junk = [0u8; 4096];
    loop {
        match (&tx).write(&junk) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("unexpected write error: {e}"),
        }
    }

    let wrote = Rc::new(Cell::new(false));
    let tx = Rc::new(tx);
    let writer = {
        let tx = tx.clone();
        let wrote = wrote.clone();
        Procedure::new(move |cx, ()| -> Result<(), Error> {
            cx.await_writable(&*tx)?;
            wrote.set(true);
            Ok(())
        })
    };

    let ev = match writer.call_nonblock(&lp, ()).unwrap() {
        Called::Pending(ev) => ev,
        Called::Ready(_) => panic!("the pipe is full, the body must suspend"),
    };
    ev.cancel().unwrap();

    // With the watch gone the loop has nothing left to do and returns
    // promptly instead of polling a descriptor nobody awaits.
    let start = Instant::now();
    lp.run().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!wrote.get());
    drop(rx);
}

#[test]
fn manual_clock_drives_timers_without_real_sleeping() {
    let clock = Rc::new(ManualClock::new(Instant::now()));
    let lp = EventLoop::with_parts(clock.clone(), NullReactor);
    let order = Rc::new(RefCell::new(Vec::new()));

    let log = order.clone();
    let napper =
        Procedure::new(move |cx, (name, hours): (&'static str, u64)| -> Result<(), Error> {
            cx.wait(Duration::from_secs(hours * 3600))?;
            log.borrow_mut().push(name);
            Ok(())
        });
    napper.call_detached(&lp, ("early", 1));
    napper.call_detached(&lp, ("late", 2));

    // Runs on the same first drain, after both nappers have suspended;
    // once time has jumped past their deadlines the loop never sleeps.
    let tick = {
        let clock = clock.clone();
        Procedure::new(move |_cx, ()| -> Result<(), Error> {
            clock.advance(Duration::from_secs(3 * 3600));
            Ok(())
        })
    };
    tick.call_and_forget(&lp, ());

    let start = Instant::now();
    lp.run().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(*order.borrow(), vec!["early", "late"]);
}

#[test]
fn coroutines_are_pooled_across_interleaved_invocations() {
    let lp = EventLoop::new();
    let nap = Procedure::new(|cx, ms: u64| -> Result<(), Error> {
        cx.wait(Duration::from_millis(ms))?;
        Ok(())
    });

    // Two concurrent bodies need two stacks.
    nap.call_detached(&lp, 5);
    nap.call_detached(&lp, 5);
    lp.run().unwrap();

    // A later burst of the same width reuses both.
    nap.call_detached(&lp, 5);
    nap.call_detached(&lp, 5);
    lp.run().unwrap();

    let stats = lp.pool_stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.reused, 2);
    assert_eq!(stats.idle, 2);
}

#[test]
fn body_panics_surface_as_errors_not_aborts() {
    let lp = EventLoop::new();
    let boom = Procedure::new(|_cx, ()| -> Result<(), Error> { panic!("overboard") });

    let err = boom.call(&lp, ()).unwrap_err();
    match err {
        Error::Failed(msg) => assert!(msg.contains("overboard")),
        other => panic!("expected a failure, got {other:?}"),
    }

    // The loop is still usable afterwards.
    let fine = Procedure::new(|_cx, ()| -> Result<i32, Error> { Ok(3) });
    assert_eq!(*fine.call(&lp, ()).unwrap(), 3);
}
