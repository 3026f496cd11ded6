//! Two-phase mutation helper.
//!
//! A [`Stage`] lists debits and credits without touching any account.
//! [`Vault::commit`](super::Vault::commit) then validates the whole list
//! against current balances and applies it, or applies nothing.

use std::collections::BTreeSet;

use num_bigint::BigUint;

use crate::crypto::hash::Hash32;
use crate::crypto::keys::Address;

/// One staged balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOp {
    /// Subtract `amount`. The account must exist and cover the net debit.
    Debit {
        address: Address,
        amount: BigUint,
        bump_nonce: bool,
    },
    /// Add `amount`, creating a shadow account if needed. When `tx_hash`
    /// is set the credit is recorded in the account's inputs.
    Credit {
        address: Address,
        amount: BigUint,
        tx_hash: Option<Hash32>,
    },
}

impl StageOp {
    pub fn address(&self) -> &Address {
        match self {
            Self::Debit { address, .. } | Self::Credit { address, .. } => address,
        }
    }
}

/// An ordered list of staged operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    ops: Vec<StageOp>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debit(mut self, address: Address, amount: BigUint) -> Self {
        self.ops.push(StageOp::Debit {
            address,
            amount,
            bump_nonce: false,
        });
        self
    }

    /// Debit that also advances the account nonce by one.
    pub fn debit_with_nonce(mut self, address: Address, amount: BigUint) -> Self {
        self.ops.push(StageOp::Debit {
            address,
            amount,
            bump_nonce: true,
        });
        self
    }

    pub fn credit(mut self, address: Address, amount: BigUint, tx_hash: Option<Hash32>) -> Self {
        self.ops.push(StageOp::Credit {
            address,
            amount,
            tx_hash,
        });
        self
    }

    pub fn ops(&self) -> &[StageOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Every address touched, sorted. This is the lock order.
    pub fn addresses(&self) -> BTreeSet<Address> {
        self.ops.iter().map(|op| *op.address()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_sorted_and_unique() {
        let a = Address([1; 32]);
        let b = Address([2; 32]);
        let stage = Stage::new()
            .debit(b, BigUint::from(1u32))
            .credit(a, BigUint::from(1u32), None)
            .credit(b, BigUint::from(1u32), None);

        let addrs: Vec<_> = stage.addresses().into_iter().collect();
        assert_eq!(addrs, vec![a, b]);
        assert_eq!(stage.ops().len(), 3);
    }
}
