//! Basic coproc example
//!
//! Demonstrates the four invocation modes, timer waits, manual
//! resumption and error callbacks on one event loop.
//!
//! Run with `RUST_LOG=coproc_runtime=trace` to watch the scheduler work.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use coproc::{downcast, Called, Error, EventLoop, Procedure};

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== coproc basic example ===\n");

    let lp = EventLoop::new();
    lp.on_error(|err| eprintln!("[error hook] {err}"));

    // Synchronous call: runs the body, driving the loop through the wait.
    let greet = Procedure::new(|cx, name: &'static str| -> Result<String, Error> {
        cx.wait(Duration::from_millis(50))?;
        Ok(format!("hello, {name}"))
    });
    println!("call:          {}", greet.call(&lp, "world")?);

    // Non-blocking call: a body that never suspends finishes on our stack.
    let sum = Procedure::new(|_cx, (a, b): (i32, i32)| -> Result<i32, Error> { Ok(a + b) });
    match sum.call_nonblock(&lp, (40, 2))? {
        Called::Ready(v) => println!("call_nonblock: ready with {v}"),
        Called::Pending(_) => unreachable!("sum never suspends"),
    }

    // Detached calls: queued now, interleaved by the loop, joined at the end.
    let order = Rc::new(RefCell::new(Vec::new()));
    let log = order.clone();
    let napper = Procedure::new(move |cx, (name, ms): (&'static str, u64)| -> Result<(), Error> {
        cx.wait(Duration::from_millis(ms))?;
        log.borrow_mut().push(name);
        Ok(())
    });
    napper.call_detached(&lp, ("slow", 30));
    napper.call_detached(&lp, ("fast", 10));
    lp.run()?;
    println!("detached:      completed as {:?}", order.borrow());

    // Manual resumption: wake a suspended body by hand, with a payload.
    let listener = Procedure::new(|cx, ()| -> Result<i32, Error> {
        let v = cx.await_resume()?;
        Ok(*downcast::<i32>(v)?)
    });
    if let Called::Pending(ev) = listener.call_nonblock(&lp, ())? {
        ev.resume_with(7_i32)?;
        println!("resume_with:   delivered {}", lp.run_until(&ev)?);
    }

    // Fire-and-forget: no handle, errors go to the hook registered above.
    let grumpy = Procedure::new(|_cx, ()| -> Result<(), Error> {
        Err(Error::failed("nobody asked for my result"))
    });
    grumpy.call_and_forget(&lp, ());
    lp.run()?;

    let stats = lp.pool_stats();
    println!(
        "\npool: {} coroutines created, {} reuses, {} idle",
        stats.created, stats.reused, stats.idle
    );
    Ok(())
}
