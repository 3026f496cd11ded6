//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] sets the required fields, checks the payload
//! bound, and returns an unsigned [`Transaction`] whose hash is already
//! computed. Signing happens in [`super::signing`].

use chrono::Utc;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::types::{amount, TxKind, TxSignature};
use super::verification::TxError;
use crate::config::MAX_PAYLOAD_BYTES;
use crate::crypto::hash::{hex_bytes, Hash32};
use crate::crypto::keys::Address;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A Cerera transaction. Immutable once signed.
///
/// `hash` is BLAKE2b-256 over [`Transaction::signable_bytes`], which covers
/// kind, from, to, value, gas limit, gas price, payload, and nonce. The
/// timestamp and the signature are not part of it, so the hash is stable
/// across signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash32,
    pub kind: TxKind,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(with = "amount")]
    pub value: BigUint,
    pub gas_limit: u64,
    #[serde(with = "amount")]
    pub gas_price: BigUint,
    #[serde(with = "hex_bytes", default)]
    pub payload: Vec<u8>,
    pub nonce: u64,
    /// Unix milliseconds at creation.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<TxSignature>,
}

impl Transaction {
    /// Canonical byte representation for hashing and signing.
    ///
    /// Big integers are length-prefixed big-endian bytes; fixed-width
    /// integers are big-endian. The optional recipient carries a presence
    /// flag.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160 + self.payload.len());

        buf.push(self.kind.as_byte());
        buf.extend_from_slice(self.from.as_bytes());
        match &self.to {
            Some(to) => {
                buf.push(0x01);
                buf.extend_from_slice(to.as_bytes());
            }
            None => buf.push(0x00),
        }
        push_biguint(&mut buf, &self.value);
        buf.extend_from_slice(&self.gas_limit.to_be_bytes());
        push_biguint(&mut buf, &self.gas_price);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.nonce.to_be_bytes());

        buf
    }

    pub fn compute_hash(&self) -> Hash32 {
        Hash32::digest(&self.signable_bytes())
    }

    /// Gas cost: `gas_limit * gas_price`.
    pub fn cost(&self) -> BigUint {
        BigUint::from(self.gas_limit) * &self.gas_price
    }

    /// `value + cost`, the amount the sender must hold for a transfer.
    pub fn total_debit(&self) -> BigUint {
        &self.value + self.cost()
    }

    pub fn carries_gas(&self) -> bool {
        self.gas_limit != 0 && !self.gas_price.is_zero()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

fn push_biguint(buf: &mut Vec<u8>, value: &BigUint) {
    let bytes = value.to_bytes_be();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(&bytes);
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for unsigned [`Transaction`] values.
///
/// ```
/// use cerera_protocol::crypto::keys::{Address, KeyPair};
/// use cerera_protocol::transaction::TransactionBuilder;
///
/// let from = KeyPair::generate().address();
/// let to = KeyPair::generate().address();
/// let tx = TransactionBuilder::transfer(from, to)
///     .value(10u64)
///     .gas(1, 3u64)
///     .nonce(1)
///     .build()
///     .unwrap();
/// assert_eq!(tx.cost(), 3u64.into());
/// ```
pub struct TransactionBuilder {
    kind: TxKind,
    from: Address,
    to: Option<Address>,
    value: BigUint,
    gas_limit: u64,
    gas_price: BigUint,
    payload: Vec<u8>,
    nonce: u64,
    timestamp: Option<u64>,
}

impl TransactionBuilder {
    fn new(kind: TxKind, from: Address, to: Option<Address>) -> Self {
        Self {
            kind,
            from,
            to,
            value: BigUint::zero(),
            gas_limit: 0,
            gas_price: BigUint::zero(),
            payload: Vec::new(),
            nonce: 0,
            timestamp: None,
        }
    }

    pub fn transfer(from: Address, to: Address) -> Self {
        Self::new(TxKind::Transfer, from, Some(to))
    }

    /// A drop from the faucet account to `to`.
    pub fn faucet(to: Address) -> Self {
        Self::new(TxKind::Faucet, Address::faucet(), Some(to))
    }

    /// A credit from the coinbase account to `to`.
    pub fn coinbase(to: Address) -> Self {
        Self::new(TxKind::Coinbase, Address::coinbase(), Some(to))
    }

    /// A transfer with no recipient. Executes as a no-op.
    pub fn empty(from: Address) -> Self {
        Self::new(TxKind::Transfer, from, None)
    }

    pub fn value(mut self, value: impl Into<BigUint>) -> Self {
        self.value = value.into();
        self
    }

    pub fn gas(mut self, limit: u64, price: impl Into<BigUint>) -> Self {
        self.gas_limit = limit;
        self.gas_price = price.into();
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the timestamp explicitly (Unix milliseconds). Defaults to now.
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Produces an unsigned transaction with its hash filled in.
    pub fn build(self) -> Result<Transaction, TxError> {
        if self.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(TxError::PayloadTooLarge {
                size: self.payload.len(),
            });
        }

        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis() as u64);

        let mut tx = Transaction {
            hash: Hash32::default(),
            kind: self.kind,
            from: self.from,
            to: self.to,
            value: self.value,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            payload: self.payload,
            nonce: self.nonce,
            timestamp,
            signature: None,
        };
        tx.hash = tx.compute_hash();
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    fn sample() -> Transaction {
        TransactionBuilder::transfer(KeyPair::generate().address(), KeyPair::generate().address())
            .value(100u64)
            .gas(2, 5u64)
            .nonce(7)
            .timestamp(1_700_000_000_000)
            .build()
            .unwrap()
    }

    #[test]
    fn hash_is_filled_and_deterministic() {
        let tx = sample();
        assert!(!tx.hash.is_zero());
        assert_eq!(tx.hash, tx.compute_hash());
    }

    #[test]
    fn timestamp_is_not_hashed() {
        let mut tx = sample();
        let before = tx.compute_hash();
        tx.timestamp += 1;
        assert_eq!(tx.compute_hash(), before);
    }

    #[test]
    fn every_covered_field_changes_the_hash() {
        let base = sample();
        let mut v = base.clone();
        v.value += 1u32;
        assert_ne!(v.compute_hash(), base.hash);

        let mut n = base.clone();
        n.nonce += 1;
        assert_ne!(n.compute_hash(), base.hash);

        let mut p = base.clone();
        p.payload = vec![1];
        assert_ne!(p.compute_hash(), base.hash);

        let mut g = base.clone();
        g.gas_limit += 1;
        assert_ne!(g.compute_hash(), base.hash);
    }

    #[test]
    fn cost_and_total_debit() {
        let tx = sample();
        assert_eq!(tx.cost(), BigUint::from(10u32));
        assert_eq!(tx.total_debit(), BigUint::from(110u32));
        assert!(tx.carries_gas());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = TransactionBuilder::faucet(KeyPair::generate().address())
            .payload(vec![0u8; MAX_PAYLOAD_BYTES + 1])
            .build()
            .unwrap_err();
        assert!(matches!(err, TxError::PayloadTooLarge { .. }));
    }

    #[test]
    fn special_kinds_fix_the_sender() {
        let to = KeyPair::generate().address();
        let faucet = TransactionBuilder::faucet(to).build().unwrap();
        let coinbase = TransactionBuilder::coinbase(to).build().unwrap();
        assert_eq!(faucet.from, Address::faucet());
        assert_eq!(coinbase.from, Address::coinbase());
        assert_ne!(faucet.hash, coinbase.hash);
    }

    #[test]
    fn json_roundtrip_keeps_hash() {
        let tx = sample();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.compute_hash(), tx.hash);
    }
}
