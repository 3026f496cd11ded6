//! # Transaction Module
//!
//! Construction, signing, and verification of Cerera transactions. Every
//! value movement the execution engine applies to the vault is a
//! [`Transaction`].
//!
//! ## Architecture
//!
//! ```text
//! types.rs        — TxKind, TxSignature, decimal amount serde
//! builder.rs      — Transaction and the fluent TransactionBuilder
//! signing.rs      — P-256 signing over the transaction hash
//! verification.rs — Structural and signature checks at mempool admission
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Build** with [`TransactionBuilder`]. The hash is computed here.
//! 2. **Sign** with [`sign_transaction`].
//! 3. **Submit** through `cerera.sendTransaction` or an `OP_TX` frame;
//!    the mempool runs [`verify_transaction`] against the sender's key.
//! 4. **Propose**: the primary drains the mempool into consensus requests.
//! 5. **Execute** on every replica once the commit quorum is reached.
//!
//! ## Design Decisions
//!
//! - The hash is BLAKE2b-256. There is no second hash function anywhere
//!   in the transaction path.
//! - Amounts are arbitrary-precision and never floating point.
//! - Payloads are opaque and capped at 64 KiB.

pub mod builder;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{Transaction, TransactionBuilder};
pub use signing::sign_transaction;
pub use types::{TxKind, TxSignature};
pub use verification::{verify_structure, verify_transaction, TxError};
