//! # Vault Module — Encrypted Account Store
//!
//! The vault is where balances live. Every account record, every credit,
//! every faucet drop passes through here, and the execution engine relies
//! on it to refuse anything that would push a balance below zero.
//!
//! ## Architecture
//!
//! ```text
//! account.rs — Account record, status, and the lockable credit history
//! file.rs    — vault.dat: hex-encoded AES-256-CFB records, one per line
//! stage.rs   — Two-phase Stage of debits and credits
//! faucet.rs  — FaucetPolicy trait and the default cooldown policy
//! store.rs   — Vault: index, locking, commit, create/restore
//! error.rs   — VaultError
//! ```
//!
//! ## Design Principles
//!
//! 1. **Balances are arbitrary-precision and never negative.** Every debit
//!    is validated before any account changes.
//!
//! 2. **Disk before memory.** A commit writes the post-state records first
//!    and only then updates the in-memory index.
//!
//! 3. **Corruption is local.** A record that fails to decrypt or parse is
//!    skipped and logged. It never takes the other records with it.
//!
//! 4. **Coinbase and faucet are permanent.** They are created with the
//!    vault and cannot be removed.

pub mod account;
pub mod error;
pub mod faucet;
pub mod file;
pub mod stage;
pub mod store;

pub use account::{passphrase_digest, Account, AccountStatus, Inputs};
pub use error::VaultError;
pub use faucet::{CooldownFaucetPolicy, FaucetPolicy};
pub use file::{ScanReport, VaultFile};
pub use stage::{Stage, StageOp};
pub use store::{BalanceMode, CreatedAccount, RestoredAccount, Vault};
