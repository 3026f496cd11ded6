//! FIFO transaction pool.
//!
//! Holds verified transactions until the primary proposes them. Each
//! transaction becomes its own consensus request, so there is no fee
//! ordering. The pool hands transactions out in arrival order.
//!
//! ## Design
//!
//! - `DashMap` keyed by transaction hash for duplicate detection and RPC
//!   lookups without a global lock.
//! - `parking_lot::Mutex<VecDeque>` keeps arrival order. Every path that
//!   drops a transaction takes this lock first and drops its hash too, so
//!   the deque never outgrows the map.
//! - Admission runs the structural checks and, for transfers, verifies the
//!   signature against the sender key the caller resolved. Execution does
//!   not re-verify signatures.

use std::collections::VecDeque;
use std::fmt;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::config::MEMPOOL_CAPACITY;
use crate::crypto::hash::Hash32;
use crate::crypto::keys::{Address, PublicKey};
use crate::transaction::{verify_structure, verify_transaction, Transaction, TxError, TxKind};

// ---------------------------------------------------------------------------
// TxSource
// ---------------------------------------------------------------------------

/// Lazy stream of validated transactions the driver pulls from when it
/// proposes.
pub trait TxSource: Send + Sync {
    fn next(&self) -> Option<Transaction>;
}

// ---------------------------------------------------------------------------
// MempoolError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0} already in mempool")]
    Duplicate(Hash32),

    #[error("mempool is full ({capacity} transactions)")]
    Full { capacity: usize },

    #[error("sender {0} has no known public key")]
    UnknownSender(Address),

    #[error("{0} transactions are not accepted from clients")]
    KindNotAccepted(TxKind),

    #[error(transparent)]
    Invalid(#[from] TxError),
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

pub struct Mempool {
    transactions: DashMap<Hash32, Transaction>,
    order: Mutex<VecDeque<Hash32>>,
    capacity: usize,
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("size", &self.transactions.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            transactions: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Admits a transaction.
    ///
    /// 1. **Structure** - payload bound, fixed sender, hash.
    /// 2. **Kind** - coinbase is never client-submitted.
    /// 3. **Signature** - transfers must verify against `sender_key`.
    /// 4. **Duplicate** - same hash already pending.
    /// 5. **Capacity**.
    pub fn add(&self, tx: Transaction, sender_key: Option<&PublicKey>) -> Result<Hash32, MempoolError> {
        verify_structure(&tx)?;

        match tx.kind {
            TxKind::Coinbase => return Err(MempoolError::KindNotAccepted(tx.kind)),
            TxKind::Faucet => {}
            TxKind::Transfer => {
                let key = sender_key.ok_or(MempoolError::UnknownSender(tx.from))?;
                verify_transaction(&tx, key)?;
            }
        }

        let hash = tx.hash;
        let mut order = self.order.lock();
        if self.transactions.contains_key(&hash) {
            return Err(MempoolError::Duplicate(hash));
        }
        if self.transactions.len() >= self.capacity {
            return Err(MempoolError::Full {
                capacity: self.capacity,
            });
        }
        self.transactions.insert(hash, tx);
        order.push_back(hash);

        debug!(%hash, pending = order.len(), "transaction admitted");
        Ok(hash)
    }

    pub fn remove(&self, hash: &Hash32) -> Option<Transaction> {
        let mut order = self.order.lock();
        let (_, tx) = self.transactions.remove(hash)?;
        if let Some(at) = order.iter().position(|h| h == hash) {
            order.remove(at);
        }
        Some(tx)
    }

    pub fn get(&self, hash: &Hash32) -> Option<Transaction> {
        self.transactions.get(hash).map(|e| e.value().clone())
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Pending transactions in arrival order.
    pub fn pending(&self) -> Vec<Transaction> {
        let order = self.order.lock();
        order.iter().filter_map(|h| self.get(h)).collect()
    }

    /// Hashes of pending transactions in arrival order.
    pub fn pending_hashes(&self) -> Vec<Hash32> {
        let order = self.order.lock();
        order
            .iter()
            .filter(|h| self.transactions.contains_key(h))
            .copied()
            .collect()
    }

    pub fn size(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn clear(&self) {
        let mut order = self.order.lock();
        self.transactions.clear();
        order.clear();
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MEMPOOL_CAPACITY)
    }
}

impl TxSource for Mempool {
    fn next(&self) -> Option<Transaction> {
        let mut order = self.order.lock();
        while let Some(hash) = order.pop_front() {
            if let Some((_, tx)) = self.transactions.remove(&hash) {
                return Some(tx);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::transaction::{sign_transaction, TransactionBuilder};

    fn signed(kp: &KeyPair, nonce: u64) -> Transaction {
        let mut tx = TransactionBuilder::transfer(kp.address(), Address([7; 32]))
            .value(5u64)
            .nonce(nonce)
            .build()
            .unwrap();
        sign_transaction(&mut tx, kp).unwrap();
        tx
    }

    #[test]
    fn next_yields_in_arrival_order() {
        let pool = Mempool::default();
        let kp = KeyPair::generate();
        let a = signed(&kp, 1);
        let b = signed(&kp, 2);
        pool.add(a.clone(), Some(kp.public_key())).unwrap();
        pool.add(b.clone(), Some(kp.public_key())).unwrap();

        assert_eq!(pool.pending_hashes(), vec![a.hash, b.hash]);
        assert_eq!(pool.next().unwrap().hash, a.hash);
        assert_eq!(pool.next().unwrap().hash, b.hash);
        assert!(pool.next().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicate_is_rejected() {
        let pool = Mempool::default();
        let kp = KeyPair::generate();
        let tx = signed(&kp, 1);
        pool.add(tx.clone(), Some(kp.public_key())).unwrap();
        assert!(matches!(
            pool.add(tx, Some(kp.public_key())),
            Err(MempoolError::Duplicate(_))
        ));
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let pool = Mempool::new(1);
        let kp = KeyPair::generate();
        pool.add(signed(&kp, 1), Some(kp.public_key())).unwrap();
        assert!(matches!(
            pool.add(signed(&kp, 2), Some(kp.public_key())),
            Err(MempoolError::Full { capacity: 1 })
        ));
    }

    #[test]
    fn transfer_needs_matching_signature() {
        let pool = Mempool::default();
        let kp = KeyPair::generate();
        let other = KeyPair::generate();

        assert!(matches!(
            pool.add(signed(&kp, 1), None),
            Err(MempoolError::UnknownSender(_))
        ));
        assert!(matches!(
            pool.add(signed(&kp, 1), Some(other.public_key())),
            Err(MempoolError::Invalid(TxError::InvalidSignature { .. }))
        ));
    }

    #[test]
    fn coinbase_is_refused_and_faucet_needs_no_key() {
        let pool = Mempool::default();
        let to = Address([3; 32]);
        let coinbase = TransactionBuilder::coinbase(to).value(1u64).build().unwrap();
        assert!(matches!(
            pool.add(coinbase, None),
            Err(MempoolError::KindNotAccepted(TxKind::Coinbase))
        ));

        let faucet = TransactionBuilder::faucet(to).value(1u64).build().unwrap();
        pool.add(faucet, None).unwrap();
    }

    #[test]
    fn removed_entries_are_skipped_by_next() {
        let pool = Mempool::default();
        let kp = KeyPair::generate();
        let a = signed(&kp, 1);
        let b = signed(&kp, 2);
        pool.add(a.clone(), Some(kp.public_key())).unwrap();
        pool.add(b.clone(), Some(kp.public_key())).unwrap();

        assert!(pool.remove(&a.hash).is_some());
        assert_eq!(pool.pending().len(), 1);
        assert_eq!(pool.next().unwrap().hash, b.hash);
    }

    #[test]
    fn remove_keeps_order_in_step() {
        let pool = Mempool::default();
        let kp = KeyPair::generate();
        for nonce in 1..=50 {
            let tx = signed(&kp, nonce);
            let hash = pool.add(tx, Some(kp.public_key())).unwrap();
            assert!(pool.remove(&hash).is_some());
        }
        assert!(pool.remove(&Hash32([9; 32])).is_none());
        assert!(pool.is_empty());
        assert!(pool.order.lock().is_empty());

        let kept = signed(&kp, 51);
        pool.add(kept.clone(), Some(kp.public_key())).unwrap();
        assert_eq!(pool.order.lock().len(), 1);
        assert_eq!(pool.pending_hashes(), vec![kept.hash]);
    }
}
