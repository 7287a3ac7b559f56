//! Run queue: pending resumptions, immediate and deadline-ordered
//!
//! Two orderings coexist:
//!
//! - an immediate-run FIFO, appended by `schedule_immediately` and drained
//!   by the event loop (entries appended during a drain are processed in
//!   the same pass, so conclusions cascade without re-entering the loop)
//! - a min-heap of delayed entries keyed by absolute deadline, ties broken
//!   by insertion order
//!
//! # Cancellation strategy
//!
//! Delayed entries use lazy cancellation: cancelled tokens go into a
//! `HashSet` and are discarded when they surface, which keeps `cancel`
//! O(1) instead of O(n) heap surgery. The set is cleared whenever the heap
//! empties. `next_deadline` may therefore report a deadline belonging to a
//! cancelled entry; the resulting wakeup is spurious but harmless because
//! `move_due` pops (and discards) the entry either way.

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::trace;

use crate::coroutine::{Coro, Resume};
use crate::evaluation::EvalCore;

/// Unique token for cancelling a delayed entry before it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerToken(u64);

impl TimerToken {
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerToken(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A resumable unit: a bare coroutine (fire-and-forget path, no handle
/// exists) or an evaluation
#[derive(Clone)]
pub(crate) enum Unit {
    Coro(Rc<Coro>),
    Eval(Rc<EvalCore>),
}

impl Unit {
    /// Identity comparison, by the underlying allocation
    pub(crate) fn is_same(&self, other: &Unit) -> bool {
        match (self, other) {
            (Unit::Coro(a), Unit::Coro(b)) => Rc::ptr_eq(a, b),
            (Unit::Eval(a), Unit::Eval(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Heap wrapper ordered earliest-deadline-first, insertion order on ties
struct DelayedEntry {
    deadline: Instant,
    seq: u64,
    token: TimerToken,
    unit: Unit,
    resume: Resume,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first),
        // tie-break by insertion sequence.
        match other.deadline.cmp(&self.deadline) {
            std::cmp::Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Ordered store of pending resumptions, owned by one event loop
#[derive(Default)]
pub(crate) struct RunQueue {
    immediate: RefCell<VecDeque<(Unit, Resume)>>,
    delayed: RefCell<BinaryHeap<DelayedEntry>>,
    cancelled: RefCell<HashSet<TimerToken>>,
    seq: Cell<u64>,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append to the immediate-run FIFO
    ///
    /// Evaluation units are deduplicated: a settled evaluation or one with
    /// a resumption already queued is skipped silently. (`resume` reports
    /// the double-schedule error to its caller before reaching this point;
    /// internal sources such as late timer fires are dropped here.)
    pub(crate) fn schedule_immediately(&self, unit: Unit, resume: Resume) {
        if let Unit::Eval(ev) = &unit {
            if ev.phase().is_settled() || ev.mark_scheduled() {
                return;
            }
            trace!(eval = ev.id().raw(), "scheduled immediately");
        }
        self.immediate.borrow_mut().push_back((unit, resume));
    }

    /// Insert into the delayed ordering; fires once `deadline` has passed
    pub(crate) fn schedule_after(
        &self,
        deadline: Instant,
        unit: Unit,
        resume: Resume,
    ) -> TimerToken {
        let token = TimerToken::next();
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.delayed.borrow_mut().push(DelayedEntry {
            deadline,
            seq,
            token,
            unit,
            resume,
        });
        token
    }

    /// Remove a delayed entry before it fires; no-op if it already fired
    pub(crate) fn cancel_scheduled(&self, token: TimerToken) {
        self.cancelled.borrow_mut().insert(token);
    }

    /// Earliest pending delayed deadline, if any
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.delayed.borrow().peek().map(|e| e.deadline)
    }

    /// Move every delayed entry whose deadline has passed into the
    /// immediate FIFO, preserving deadline order. Returns how many fired.
    pub(crate) fn move_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let entry = {
                let mut delayed = self.delayed.borrow_mut();
                match delayed.peek() {
                    Some(e) if e.deadline <= now => delayed.pop(),
                    _ => break,
                }
            };
            let Some(entry) = entry else { break };
            if self.cancelled.borrow_mut().remove(&entry.token) {
                continue;
            }
            self.schedule_immediately(entry.unit, entry.resume);
            fired += 1;
        }
        if self.delayed.borrow().is_empty() {
            self.cancelled.borrow_mut().clear();
        }
        fired
    }

    /// Pop the next immediate entry in FIFO order
    pub(crate) fn pop_immediate(&self) -> Option<(Unit, Resume)> {
        self.immediate.borrow_mut().pop_front()
    }

    #[inline]
    pub(crate) fn has_immediate(&self) -> bool {
        !self.immediate.borrow().is_empty()
    }

    #[inline]
    pub(crate) fn has_delayed(&self) -> bool {
        !self.delayed.borrow().is_empty()
    }
}
