//! # Storage Module
//!
//! Blocks and the chain that orders them.
//!
//! ## Architecture
//!
//! ```text
//! block.rs  — Block structure, genesis block, hash/verify operations
//! chain.rs  — Chain trait and the in-memory MemoryChain
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! finalized round → Block::new(tip, [tx], primary) → Chain::append
//! ```
//!
//! Account state is not stored here. Balances live in the vault, and a
//! block only records which transaction a round decided.

pub mod block;
pub mod chain;

pub use block::{Block, BlockHeader};
pub use chain::{Chain, ChainError, MemoryChain};
