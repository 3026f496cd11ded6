//! Applies one validated transaction to the vault.
//!
//! The engine checks preconditions, turns the transaction into a
//! [`Stage`], and hands it to the vault. Either every balance change of a
//! transaction lands or none does.
//!
//! | Kind       | Funded by | Debit            | Credit            | Gas    |
//! |------------|-----------|------------------|-------------------|--------|
//! | `Transfer` | sender    | `value + cost`   | `value` to `to`   | burned |
//! | `Faucet`   | faucet    | via faucet drop  | `value` to `to`   | none   |
//! | `Coinbase` | coinbase  | `value`          | `value` to `to`   | none   |

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use thiserror::Error;
use tracing::debug;

use crate::crypto::hash::Hash32;
use crate::crypto::keys::Address;
use crate::events::{EventBus, NodeEvent};
use crate::transaction::{Transaction, TxKind};
use crate::vault::{Stage, Vault, VaultError};

/// Why a transaction was not applied.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("sender {0} not found")]
    SenderNotFound(Address),

    #[error("balance {available} cannot cover {needed}")]
    InsufficientBalance { needed: BigUint, available: BigUint },

    #[error("gas cost {cost} below minimum {min}")]
    GasPriceTooLow { cost: BigUint, min: BigUint },

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Errors from the execution engine and its worker pool.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("transaction {hash} rejected: {reason}")]
    TxRejected { hash: Hash32, reason: RejectReason },

    #[error("execution pool is shut down")]
    PoolClosed,
}

/// What happened to an accepted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// A transaction without a recipient. Nothing changes.
    NoOp,
}

/// Stateless executor over a shared vault.
#[derive(Debug)]
pub struct ExecutionEngine {
    vault: Arc<Vault>,
    events: EventBus,
    min_gas_price: BigUint,
}

impl ExecutionEngine {
    pub fn new(vault: Arc<Vault>, events: EventBus, min_gas_price: u64) -> Self {
        Self {
            vault,
            events,
            min_gas_price: BigUint::from(min_gas_price),
        }
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// Applies `tx`. Rejections leave the vault unchanged.
    pub fn apply(&self, tx: &Transaction) -> Result<Outcome, ExecError> {
        let reject = |reason: RejectReason| ExecError::TxRejected {
            hash: tx.hash,
            reason,
        };

        let Some(to) = tx.to else {
            debug!(hash = %tx.hash, "transaction without recipient, no-op");
            return Ok(Outcome::NoOp);
        };

        match tx.kind {
            TxKind::Transfer => self.apply_transfer(tx, to).map_err(reject)?,
            TxKind::Faucet => self
                .vault
                .drop_faucet(&to, &tx.value, tx.hash)
                .map_err(|e| reject(e.into()))?,
            TxKind::Coinbase => self.apply_coinbase(tx, to).map_err(reject)?,
        }

        debug!(hash = %tx.hash, kind = %tx.kind, %to, value = %tx.value, "transaction applied");
        self.events.publish(NodeEvent::TransactionApplied {
            hash: tx.hash,
            kind: tx.kind,
            from: tx.from,
            to: tx.to,
            value: tx.value.to_str_radix(10),
        });
        Ok(Outcome::Applied)
    }

    fn apply_transfer(&self, tx: &Transaction, to: Address) -> Result<(), RejectReason> {
        let available = self
            .vault
            .balance(&tx.from)
            .ok_or(RejectReason::SenderNotFound(tx.from))?;

        let cost = tx.cost();
        if tx.gas_limit != 0 && cost < self.min_gas_price {
            return Err(RejectReason::GasPriceTooLow {
                cost,
                min: self.min_gas_price.clone(),
            });
        }

        let needed = &tx.value + &cost;
        if available < needed {
            return Err(RejectReason::InsufficientBalance { needed, available });
        }

        let mut stage = Stage::new().debit_with_nonce(tx.from, needed);
        if !tx.value.is_zero() {
            stage = stage.credit(to, tx.value.clone(), Some(tx.hash));
        }
        self.vault.commit(&stage)?;
        Ok(())
    }

    fn apply_coinbase(&self, tx: &Transaction, to: Address) -> Result<(), RejectReason> {
        let coinbase = Address::coinbase();
        let available = self
            .vault
            .balance(&coinbase)
            .ok_or(RejectReason::SenderNotFound(coinbase))?;
        if available < tx.value {
            return Err(RejectReason::InsufficientBalance {
                needed: tx.value.clone(),
                available,
            });
        }
        if tx.value.is_zero() {
            return Ok(());
        }

        let stage = Stage::new()
            .debit(coinbase, tx.value.clone())
            .credit(to, tx.value.clone(), Some(tx.hash));
        self.vault.commit(&stage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::transaction::TransactionBuilder;
    use crate::vault::{BalanceMode, CooldownFaucetPolicy};
    use std::time::Duration;

    fn engine() -> ExecutionEngine {
        let policy = Arc::new(CooldownFaucetPolicy::new(1u64, 1_000u64, Duration::from_secs(60)));
        let vault = Arc::new(Vault::in_memory(&KeyPair::generate(), policy, EventBus::new()));
        ExecutionEngine::new(vault, EventBus::new(), 3)
    }

    fn fund(engine: &ExecutionEngine, amount: u64) -> Address {
        let addr = KeyPair::generate().address();
        engine
            .vault()
            .update_balance(
                &Address::coinbase(),
                &addr,
                &BigUint::from(amount),
                Hash32::digest(addr.as_bytes()),
                BalanceMode::Strict,
            )
            .unwrap();
        addr
    }

    #[test]
    fn transfer_burns_gas_and_bumps_nonce() {
        let engine = engine();
        let a = fund(&engine, 100);
        let b = KeyPair::generate().address();
        let tx = TransactionBuilder::transfer(a, b)
            .value(10u64)
            .gas(1, 3u64)
            .build()
            .unwrap();

        assert_eq!(engine.apply(&tx).unwrap(), Outcome::Applied);
        let vault = engine.vault();
        assert_eq!(vault.balance(&a), Some(BigUint::from(87u32)));
        assert_eq!(vault.balance(&b), Some(BigUint::from(10u32)));
        assert_eq!(vault.get(&a).unwrap().nonce, 1);
        assert_eq!(vault.inputs(&b).unwrap().get(&tx.hash), Some(BigUint::from(10u32)));
    }

    #[test]
    fn gasless_transfer_conserves_total() {
        let engine = engine();
        let a = fund(&engine, 100);
        let before = engine.vault().total_balance();
        let tx = TransactionBuilder::transfer(a, KeyPair::generate().address())
            .value(40u64)
            .build()
            .unwrap();
        engine.apply(&tx).unwrap();
        assert_eq!(engine.vault().total_balance(), before);
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let engine = engine();
        let a = fund(&engine, 10);
        let tx = TransactionBuilder::transfer(a, KeyPair::generate().address())
            .value(10u64)
            .gas(1, 3u64)
            .build()
            .unwrap();
        let err = engine.apply(&tx).unwrap_err();
        assert!(matches!(
            err,
            ExecError::TxRejected {
                reason: RejectReason::InsufficientBalance { .. },
                ..
            }
        ));
        assert_eq!(engine.vault().balance(&a), Some(BigUint::from(10u32)));
    }

    #[test]
    fn cheap_gas_is_rejected_only_when_gas_is_set() {
        let engine = engine();
        let a = fund(&engine, 100);
        let cheap = TransactionBuilder::transfer(a, KeyPair::generate().address())
            .value(1u64)
            .gas(1, 1u64)
            .build()
            .unwrap();
        assert!(matches!(
            engine.apply(&cheap),
            Err(ExecError::TxRejected {
                reason: RejectReason::GasPriceTooLow { .. },
                ..
            })
        ));
        let free = TransactionBuilder::transfer(a, KeyPair::generate().address())
            .value(1u64)
            .build()
            .unwrap();
        engine.apply(&free).unwrap();
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let engine = engine();
        let tx = TransactionBuilder::transfer(KeyPair::generate().address(), Address::faucet())
            .value(1u64)
            .build()
            .unwrap();
        assert!(matches!(
            engine.apply(&tx),
            Err(ExecError::TxRejected {
                reason: RejectReason::SenderNotFound(_),
                ..
            })
        ));
    }

    #[test]
    fn faucet_and_coinbase_conserve_total() {
        let engine = engine();
        let before = engine.vault().total_balance();
        let b = KeyPair::generate().address();

        engine
            .apply(&TransactionBuilder::faucet(b).value(100u64).build().unwrap())
            .unwrap();
        engine
            .apply(&TransactionBuilder::coinbase(b).value(50u64).build().unwrap())
            .unwrap();

        assert_eq!(engine.vault().balance(&b), Some(BigUint::from(150u32)));
        assert_eq!(engine.vault().total_balance(), before);
    }

    #[test]
    fn faucet_limit_surfaces_as_rejection() {
        let engine = engine();
        let tx = TransactionBuilder::faucet(KeyPair::generate().address())
            .value(5_000u64)
            .build()
            .unwrap();
        assert!(matches!(
            engine.apply(&tx),
            Err(ExecError::TxRejected {
                reason: RejectReason::Vault(VaultError::FaucetLimit(_)),
                ..
            })
        ));
    }

    #[test]
    fn missing_recipient_is_noop() {
        let engine = engine();
        let a = fund(&engine, 5);
        let tx = TransactionBuilder::empty(a).value(5u64).build().unwrap();
        assert_eq!(engine.apply(&tx).unwrap(), Outcome::NoOp);
        assert_eq!(engine.vault().balance(&a), Some(BigUint::from(5u32)));
    }
}
