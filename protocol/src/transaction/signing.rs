//! Transaction signing with P-256 keypairs.
//!
//! The signature covers the transaction hash, which is itself BLAKE2b-256
//! over [`Transaction::signable_bytes`]. Signing therefore never changes
//! the hash.

use super::builder::Transaction;
use super::types::TxSignature;
use crate::crypto::keys::KeyPair;
use crate::crypto::signatures::{sign_hash_fixed, SignerError};

/// Signs a transaction in place.
///
/// Recomputes the hash first so that a caller who edited fields after
/// building still signs what will be verified.
///
/// ```
/// use cerera_protocol::crypto::keys::KeyPair;
/// use cerera_protocol::transaction::{sign_transaction, TransactionBuilder};
///
/// let kp = KeyPair::generate();
/// let mut tx = TransactionBuilder::transfer(kp.address(), KeyPair::generate().address())
///     .value(1u64)
///     .build()
///     .unwrap();
/// sign_transaction(&mut tx, &kp).unwrap();
/// assert!(tx.is_signed());
/// ```
pub fn sign_transaction<'a>(
    tx: &'a mut Transaction,
    keypair: &KeyPair,
) -> Result<&'a Transaction, SignerError> {
    tx.hash = tx.compute_hash();
    let rs = sign_hash_fixed(&tx.hash, keypair)?;
    tx.signature = Some(TxSignature {
        r: hex::encode(&rs[..32]),
        s: hex::encode(&rs[32..]),
        v: keypair.public_key().parity(),
    });
    Ok(tx)
}
