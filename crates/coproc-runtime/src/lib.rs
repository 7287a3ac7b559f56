//! Cooperative single-threaded runtime: pooled coroutines, evaluations,
//! run queue and event loop
//!
//! This crate is the machinery; most users want the `coproc` facade
//! instead. Everything here is deliberately not `Send`: one loop per
//! thread, driven by the thread that created it.

pub mod clock;
pub mod coroutine;
pub mod cx;
pub mod evaluation;
pub mod event_loop;
pub mod pool;
pub mod proc;
pub mod reactor;
pub mod run_queue;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use cx::Cx;
pub use evaluation::Evaluation;
pub use event_loop::EventLoop;
pub use pool::PoolStats;
pub use proc::{Called, Procedure};
pub use reactor::{Interest, IoToken, NullReactor, PollReactor, Reactor};
