// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Cerera Protocol — Core Library
//!
//! A permissioned validator network that agrees on one client request at a
//! time with single-view PBFT, and applies the agreed operations to an
//! encrypted account vault.
//!
//! The crate is the whole node minus its process shell: the `cerera`
//! binary in `node/` only parses flags, sets up logging and serves HTTP.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants and the runtime `NodeConfig`.
//! - **crypto** — P-256 keys, BLAKE2b digests, the 71-byte wire signature,
//!   vault encryption and BIP-39 account derivation.
//! - **transaction** — Transaction construction, signing and checks.
//! - **vault** — Encrypted append-only account store with an in-memory index.
//! - **execution** — Applies committed transactions to the vault, sharded
//!   by sender over a worker pool.
//! - **storage** — Blocks and the in-memory chain.
//! - **consensus** — Validator set, round state and the PBFT driver.
//! - **network** — Frame codec, messages, TCP transport, mempool, RPC.
//! - **events** — Observer events pushed to subscribers.
//! - **node** — Owns and wires every component.
//!
//! ## Design Philosophy
//!
//! 1. A peer can make us drop its message. It cannot make us panic.
//! 2. Balances never go negative and money is never created outside the
//!    coinbase and faucet accounts.
//! 3. Every component takes its collaborators as constructor arguments.
//!    There are no globals.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod events;
pub mod execution;
pub mod network;
pub mod node;
pub mod storage;
pub mod transaction;
pub mod vault;

pub use node::{Node, NodeError};
