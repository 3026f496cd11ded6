//! # Execution Module
//!
//! Turns finalized requests into balance changes.
//!
//! ```text
//! engine.rs — ExecutionEngine: preconditions, staging, commit
//! pool.rs   — ExecutionPool: tokio workers sharded by sender
//! ```
//!
//! The engine is synchronous and holds no state of its own. All state is in
//! the vault, which serializes conflicting commits. The pool exists so the
//! consensus driver never waits on a vault write.

pub mod engine;
pub mod pool;

pub use engine::{ExecError, ExecutionEngine, Outcome, RejectReason};
pub use pool::{ExecResult, ExecutionPool};
