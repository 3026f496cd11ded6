//! The chain collaborator.
//!
//! Consensus only needs a handful of operations from the block store, so
//! they sit behind the [`Chain`] trait. [`MemoryChain`] is the in-process
//! implementation the node uses.
//!
//! A chain can be put into the idle state while a joining node syncs
//! accounts. Idle only pauses block production. Reads keep working.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use super::block::Block;
use crate::crypto::hash::Hash32;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block height {got} does not extend tip {tip}")]
    HeightMismatch { tip: u64, got: u64 },

    #[error("block parent {got} is not the tip {tip}")]
    ParentMismatch { tip: Hash32, got: Hash32 },

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("chain is idle")]
    Idle,
}

/// Block store operations used by consensus and RPC.
pub trait Chain: Send + Sync {
    fn latest_block(&self) -> Block;
    fn block_by_hash(&self, hash: &Hash32) -> Option<Block>;
    fn block_by_number(&self, height: u64) -> Option<Block>;
    fn append(&self, block: Block) -> Result<(), ChainError>;
    fn idle(&self);
    fn resume(&self);
    fn is_idle(&self) -> bool;

    /// Number of blocks including genesis.
    fn block_count(&self) -> u64 {
        self.latest_block().height() + 1
    }
}

#[derive(Debug, Default)]
struct Blocks {
    by_height: Vec<Block>,
    by_hash: HashMap<Hash32, usize>,
}

/// Vector-backed chain starting from [`Block::genesis`].
#[derive(Debug)]
pub struct MemoryChain {
    blocks: RwLock<Blocks>,
    idle: AtomicBool,
}

impl MemoryChain {
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let mut blocks = Blocks::default();
        blocks.by_hash.insert(genesis.hash(), 0);
        blocks.by_height.push(genesis);
        Self {
            blocks: RwLock::new(blocks),
            idle: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain for MemoryChain {
    fn latest_block(&self) -> Block {
        let blocks = self.blocks.read();
        // Genesis is pushed in `new`, so the vector is never empty.
        blocks.by_height[blocks.by_height.len() - 1].clone()
    }

    fn block_by_hash(&self, hash: &Hash32) -> Option<Block> {
        let blocks = self.blocks.read();
        blocks
            .by_hash
            .get(hash)
            .and_then(|&i| blocks.by_height.get(i))
            .cloned()
    }

    fn block_by_number(&self, height: u64) -> Option<Block> {
        let index = usize::try_from(height).ok()?;
        self.blocks.read().by_height.get(index).cloned()
    }

    fn append(&self, block: Block) -> Result<(), ChainError> {
        if self.is_idle() {
            return Err(ChainError::Idle);
        }
        block.verify().map_err(ChainError::InvalidBlock)?;

        let mut blocks = self.blocks.write();
        let tip = &blocks.by_height[blocks.by_height.len() - 1];
        if block.height() != tip.height() + 1 {
            return Err(ChainError::HeightMismatch {
                tip: tip.height(),
                got: block.height(),
            });
        }
        if block.header.parent_hash != tip.hash() {
            return Err(ChainError::ParentMismatch {
                tip: tip.hash(),
                got: block.header.parent_hash,
            });
        }

        let index = blocks.by_height.len();
        blocks.by_hash.insert(block.hash(), index);
        blocks.by_height.push(block);
        Ok(())
    }

    fn idle(&self) {
        if !self.idle.swap(true, Ordering::SeqCst) {
            info!("chain idle");
        }
    }

    fn resume(&self) {
        if self.idle.swap(false, Ordering::SeqCst) {
            info!("chain resumed");
        }
    }

    fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Address;

    #[test]
    fn starts_at_genesis() {
        let chain = MemoryChain::new();
        assert_eq!(chain.latest_block(), Block::genesis());
        assert_eq!(chain.block_count(), 1);
        assert!(chain.block_by_number(1).is_none());
    }

    #[test]
    fn append_extends_tip_and_indexes_hash() {
        let chain = MemoryChain::new();
        let b1 = Block::new(&chain.latest_block(), vec![], Address([1; 32]));
        chain.append(b1.clone()).unwrap();

        assert_eq!(chain.latest_block(), b1);
        assert_eq!(chain.block_by_hash(&b1.hash()), Some(b1.clone()));
        assert_eq!(chain.block_by_number(1), Some(b1));
        assert_eq!(chain.block_count(), 2);
    }

    #[test]
    fn append_rejects_non_extending_block() {
        let chain = MemoryChain::new();
        let genesis = chain.latest_block();
        let b1 = Block::new(&genesis, vec![], Address([1; 32]));
        chain.append(b1).unwrap();

        let stale = Block::new(&genesis, vec![], Address([2; 32]));
        assert!(matches!(
            chain.append(stale),
            Err(ChainError::HeightMismatch { tip: 1, got: 1 })
        ));
    }

    #[test]
    fn idle_blocks_appends_until_resume() {
        let chain = MemoryChain::new();
        chain.idle();
        assert!(chain.is_idle());
        let b1 = Block::new(&chain.latest_block(), vec![], Address([1; 32]));
        assert!(matches!(chain.append(b1.clone()), Err(ChainError::Idle)));

        chain.resume();
        chain.append(b1).unwrap();
    }
}
