//! # Block Structure
//!
//! A block records the transactions a round finalized. Consensus decides
//! one request per round, so a block usually carries exactly one
//! transaction. Empty blocks appear only as genesis.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BlockHeader                                │
//! │  ├── height: u64                            │
//! │  ├── hash: Hash32          (BLAKE2b header) │
//! │  ├── parent_hash: Hash32                    │
//! │  ├── timestamp: u64        (ms)             │
//! │  ├── chain_id: u64                          │
//! │  ├── proposer: Address                      │
//! │  └── tx_root: Hash32       (Merkle root)    │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block hash covers `height || parent_hash || timestamp || chain_id ||
//! proposer || tx_root`, all integers little-endian.
//!
//! ## Merkle Root
//!
//! `tx_root` is a binary Merkle tree over the transaction hashes. An odd
//! node is paired with itself. Empty blocks have an all-zero root.

use serde::{Deserialize, Serialize};

use crate::config::CHAIN_ID;
use crate::crypto::hash::{blake2b256, blake2b256_parts, Hash32};
use crate::crypto::keys::Address;
use crate::transaction::Transaction;

/// Anchors the genesis hash.
pub const GENESIS_MESSAGE: &[u8] = b"cerera/genesis";

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Genesis is 0.
    pub height: u64,
    pub hash: Hash32,
    /// All zeros for genesis.
    pub parent_hash: Hash32,
    /// Unix milliseconds at construction.
    pub timestamp: u64,
    pub chain_id: u64,
    /// The primary that proposed the finalized request.
    pub proposer: Address,
    pub tx_root: Hash32,
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The fixed genesis block. Every node computes the same one.
    pub fn genesis() -> Self {
        let parent_hash = Hash32(blake2b256(GENESIS_MESSAGE));
        let proposer = Address::default();
        let tx_root = Hash32::default();
        let hash = compute_header_hash(0, &parent_hash, 0, CHAIN_ID, &proposer, &tx_root);

        Block {
            header: BlockHeader {
                height: 0,
                hash,
                parent_hash,
                timestamp: 0,
                chain_id: CHAIN_ID,
                proposer,
                tx_root,
            },
            transactions: Vec::new(),
        }
    }

    /// A block extending `parent`.
    pub fn new(parent: &Block, transactions: Vec<Transaction>, proposer: Address) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::with_timestamp(parent, transactions, proposer, timestamp)
    }

    pub fn with_timestamp(
        parent: &Block,
        transactions: Vec<Transaction>,
        proposer: Address,
        timestamp: u64,
    ) -> Self {
        let height = parent.header.height + 1;
        let parent_hash = parent.header.hash;
        let chain_id = parent.header.chain_id;
        let tx_root = compute_merkle_root(&transactions);
        let hash = compute_header_hash(height, &parent_hash, timestamp, chain_id, &proposer, &tx_root);

        Block {
            header: BlockHeader {
                height,
                hash,
                parent_hash,
                timestamp,
                chain_id,
                proposer,
                tx_root,
            },
            transactions,
        }
    }

    pub fn compute_hash(&self) -> Hash32 {
        let h = &self.header;
        compute_header_hash(h.height, &h.parent_hash, h.timestamp, h.chain_id, &h.proposer, &h.tx_root)
    }

    /// Checks the stored hash and the transaction root.
    pub fn verify(&self) -> Result<(), String> {
        let expected_hash = self.compute_hash();
        if self.header.hash != expected_hash {
            return Err(format!(
                "block {} hash mismatch: stored={}, computed={}",
                self.header.height, self.header.hash, expected_hash,
            ));
        }

        let expected_root = compute_merkle_root(&self.transactions);
        if self.header.tx_root != expected_root {
            return Err(format!(
                "block {} tx_root mismatch: stored={}, computed={}",
                self.header.height, self.header.tx_root, expected_root,
            ));
        }
        Ok(())
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash32 {
        self.header.hash
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

// ---------------------------------------------------------------------------
// Hash Computation
// ---------------------------------------------------------------------------

fn compute_header_hash(
    height: u64,
    parent_hash: &Hash32,
    timestamp: u64,
    chain_id: u64,
    proposer: &Address,
    tx_root: &Hash32,
) -> Hash32 {
    Hash32(blake2b256_parts(&[
        &height.to_le_bytes(),
        parent_hash.as_bytes(),
        &timestamp.to_le_bytes(),
        &chain_id.to_le_bytes(),
        proposer.as_bytes(),
        tx_root.as_bytes(),
    ]))
}

/// Binary Merkle root over transaction hashes.
pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash32 {
    if transactions.is_empty() {
        return Hash32::default();
    }

    let mut level: Vec<Hash32> = transactions.iter().map(|tx| tx.hash).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                Hash32(blake2b256_parts(&[pair[0].as_bytes(), right.as_bytes()]))
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionBuilder;

    fn tx(nonce: u64) -> Transaction {
        TransactionBuilder::transfer(Address([1; 32]), Address([2; 32]))
            .value(10u64)
            .nonce(nonce)
            .timestamp(1_000)
            .build()
            .unwrap()
    }

    #[test]
    fn genesis_is_deterministic_and_valid() {
        let g1 = Block::genesis();
        let g2 = Block::genesis();
        assert_eq!(g1, g2);
        assert_eq!(g1.height(), 0);
        assert_eq!(g1.header.chain_id, CHAIN_ID);
        assert!(g1.verify().is_ok());
    }

    #[test]
    fn child_links_to_parent() {
        let genesis = Block::genesis();
        let b1 = Block::new(&genesis, vec![tx(0)], Address([9; 32]));
        assert_eq!(b1.height(), 1);
        assert_eq!(b1.header.parent_hash, genesis.hash());
        assert!(b1.verify().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let genesis = Block::genesis();
        let mut block = Block::with_timestamp(&genesis, vec![tx(0)], Address([9; 32]), 5);
        block.header.hash.0[0] ^= 0xff;
        assert!(block.verify().is_err());

        let mut block = Block::with_timestamp(&genesis, vec![tx(0)], Address([9; 32]), 5);
        block.transactions.push(tx(1));
        assert!(block.verify().is_err());
    }

    #[test]
    fn merkle_root_single_tx_is_its_hash() {
        let t = tx(3);
        assert_eq!(compute_merkle_root(std::slice::from_ref(&t)), t.hash);
        assert!(compute_merkle_root(&[]).is_zero());
    }

    #[test]
    fn merkle_root_is_order_sensitive() {
        let (a, b) = (tx(1), tx(2));
        assert_ne!(
            compute_merkle_root(&[a.clone(), b.clone()]),
            compute_merkle_root(&[b, a])
        );
    }
}
