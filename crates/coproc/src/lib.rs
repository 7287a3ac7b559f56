//! # coproc - Cooperative Concurrency on Pooled Coroutines
//!
//! A single-threaded concurrency runtime: procedures run as stackful
//! coroutines on an event loop, suspend cooperatively on timers and
//! descriptor readiness, and hand out evaluation handles that can be
//! awaited, resumed, concluded or cancelled from anywhere on the loop.
//!
//! ## Features
//!
//! - **Pooled coroutines**: stacks are reused across invocations; the
//!   per-call cost after warmup is a queue push, not a stack allocation
//! - **Four invocation modes**: synchronous, from-inside-the-loop,
//!   non-blocking, and detached/fire-and-forget
//! - **Lazy handles**: a body that never suspends never allocates an
//!   evaluation
//! - **Explicit suspension**: bodies receive a [`Cx`] and only suspend
//!   through it; nothing yields behind your back
//! - **External control**: any holder of an [`Evaluation`] can resume it
//!   with a value, conclude it with a result, or cancel it mid-flight
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use coproc::{Error, EventLoop, Procedure};
//!
//! fn main() -> Result<(), Error> {
//!     let lp = EventLoop::new();
//!
//!     let greet = Procedure::new(|cx, name: String| -> Result<String, Error> {
//!         cx.wait(Duration::from_millis(10))?;
//!         Ok(format!("hello, {name}"))
//!     });
//!
//!     // Synchronous bridge: drives the loop until the body concludes.
//!     let greeting = greet.call(&lp, "world".to_string())?;
//!     println!("{greeting}");
//!
//!     // Detached: queued for the next loop turn, handle returned now.
//!     let ev = greet.call_detached(&lp, "later".to_string());
//!     println!("{}", lp.run_until(&ev)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! Everything runs on the thread that created the [`EventLoop`]; no type
//! in this crate is `Send`. Concurrency comes from interleaving at
//! suspension points, so plain `Rc`/`RefCell` state shared between bodies
//! needs no locking. The trade-off is the usual one: a body that blocks
//! the thread blocks every body.
//!
//! The crate targets Unix; descriptor readiness is multiplexed with
//! `poll(2)`.

pub use coproc_core::value::{downcast, unit_value, value};
pub use coproc_core::{CoroId, Error, EvalId, EvalPhase, EvalResult, Value};

pub use coproc_runtime::{
    Called, Clock, Cx, Evaluation, EventLoop, Interest, IoToken, ManualClock, MonotonicClock,
    NullReactor, PollReactor, PoolStats, Procedure, Reactor,
};
