//! Transaction verification: structural checks and signature validation.
//!
//! Runs at mempool admission. Execution assumes the transaction already
//! passed here and only checks balances. Checks go from cheapest to most
//! expensive.

use thiserror::Error;

use super::builder::Transaction;
use super::types::TxKind;
use crate::config::MAX_PAYLOAD_BYTES;
use crate::crypto::hash::{decode_fixed_hex, Hash32};
use crate::crypto::keys::{Address, PublicKey};
use crate::crypto::signatures::verify_hash_fixed;

/// Errors from transaction construction and verification.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("payload of {size} bytes exceeds {MAX_PAYLOAD_BYTES}")]
    PayloadTooLarge { size: usize },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash32, actual: Hash32 },

    #[error("{kind} transaction must originate from {expected}")]
    WrongSender { kind: TxKind, expected: Address },

    #[error("transaction is unsigned")]
    MissingSignature,

    #[error("malformed signature: {reason}")]
    MalformedSignature { reason: String },

    #[error("signature does not verify against sender {sender}")]
    InvalidSignature { sender: Address },
}

/// Structural checks that need no key material.
pub fn verify_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(TxError::PayloadTooLarge {
            size: tx.payload.len(),
        });
    }

    let expected_from = match tx.kind {
        TxKind::Transfer => None,
        TxKind::Faucet => Some(Address::faucet()),
        TxKind::Coinbase => Some(Address::coinbase()),
    };
    if let Some(expected) = expected_from {
        if tx.from != expected {
            return Err(TxError::WrongSender {
                kind: tx.kind,
                expected,
            });
        }
    }

    let actual = tx.compute_hash();
    if actual != tx.hash {
        return Err(TxError::HashMismatch {
            expected: tx.hash,
            actual,
        });
    }
    Ok(())
}

/// Full verification against the sender's public key.
pub fn verify_transaction(tx: &Transaction, sender_key: &PublicKey) -> Result<(), TxError> {
    verify_structure(tx)?;

    let sig = tx.signature.as_ref().ok_or(TxError::MissingSignature)?;
    let malformed = |reason: String| TxError::MalformedSignature { reason };

    let r = decode_fixed_hex::<32>(&sig.r).map_err(|e| malformed(e.to_string()))?;
    let s = decode_fixed_hex::<32>(&sig.s).map_err(|e| malformed(e.to_string()))?;
    if sig.v > 1 {
        return Err(malformed(format!("v must be 0 or 1, got {}", sig.v)));
    }

    let invalid = || TxError::InvalidSignature { sender: tx.from };
    if sig.v != sender_key.parity() {
        return Err(invalid());
    }

    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&r);
    rs[32..].copy_from_slice(&s);
    if !verify_hash_fixed(&tx.hash, &rs, sender_key) {
        return Err(invalid());
    }
    Ok(())
}
