//! Identifier types for evaluations and pooled coroutines

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of one evaluation
///
/// Every invocation that materializes an evaluation gets a fresh id.
/// Identifiers are never reused, even after the evaluation is dropped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EvalId(u64);

impl EvalId {
    /// Allocate the next identifier
    #[inline]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        EvalId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value (for logging)
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvalId({})", self.0)
    }
}

impl fmt::Display for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation #{}", self.0)
    }
}

/// Unique identifier of one pooled coroutine
///
/// A coroutine keeps its id for its whole lifetime, across every
/// evaluation it is reused for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoroId(u64);

impl CoroId {
    /// Allocate the next identifier
    #[inline]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        CoroId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value (for logging)
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_id_uniqueness() {
        let ids: Vec<_> = (0..1000).map(|_| EvalId::next()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_coro_id_uniqueness() {
        let ids: Vec<_> = (0..1000).map(|_| CoroId::next()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_display() {
        let id = EvalId::next();
        assert_eq!(format!("{}", id), format!("evaluation #{}", id.raw()));
    }
}
