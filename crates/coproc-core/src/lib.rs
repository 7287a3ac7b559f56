//! # coproc-core
//!
//! Core types for the coproc cooperative concurrency runtime.
//!
//! This crate is scheduler-agnostic: it contains the identifier, state and
//! error vocabulary shared by the runtime, plus the `:error` callback
//! registry. The scheduling engine itself lives in `coproc-runtime`.
//!
//! ## Modules
//!
//! - `id` - evaluation and coroutine identifier types
//! - `state` - evaluation phase and coroutine state enums
//! - `error` - error taxonomy
//! - `value` - shared dynamically-typed result values
//! - `hooks` - `:error` callback registry

pub mod error;
pub mod hooks;
pub mod id;
pub mod state;
pub mod value;

// Re-exports for convenience
pub use error::Error;
pub use hooks::Hooks;
pub use id::{CoroId, EvalId};
pub use state::{CoroState, EvalPhase};
pub use value::{unit_value, EvalResult, Value};
