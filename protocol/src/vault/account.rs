//! # Account Records
//!
//! An [`Account`] is the unit the vault stores, encrypts, and indexes. It is
//! serialized as JSON with balances as decimal strings and the credit
//! history (`inputs`) as a map from transaction hash to amount.
//!
//! ## Credit history
//!
//! [`Inputs`] has its own read/write lock so that an RPC handler can walk one
//! account's history while the execution engine updates other accounts.
//! Entries are only ever inserted or overwritten, never removed.
//!
//! Cloning an [`Account`] deep-copies its inputs. Sharing the live history
//! goes through [`Inputs::share`].

use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::hash::Hash32;
use crate::crypto::keys::{Address, KeyPair, PublicKey};
use crate::transaction::types::amount;

// ---------------------------------------------------------------------------
// AccountStatus
// ---------------------------------------------------------------------------

/// Role of an account. Serialized by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// The node's own account. `code_hash` holds its secret key.
    Node,
    Coinbase,
    Faucet,
    User,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Append-only credit history: tx hash -> credited amount.
#[derive(Debug, Default)]
pub struct Inputs(Arc<RwLock<BTreeMap<Hash32, BigUint>>>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another handle onto the same history.
    pub fn share(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    /// Records a credit. Re-recording the same hash overwrites, so
    /// re-executing a transaction leaves one entry.
    pub fn record(&self, tx_hash: Hash32, amount: BigUint) {
        self.0.write().insert(tx_hash, amount);
    }

    pub fn get(&self, tx_hash: &Hash32) -> Option<BigUint> {
        self.0.read().get(tx_hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Sum of all recorded credits.
    pub fn total(&self) -> BigUint {
        self.0.read().values().fold(BigUint::zero(), |acc, v| acc + v)
    }

    /// Point-in-time copy of the history.
    pub fn snapshot(&self) -> BTreeMap<Hash32, BigUint> {
        self.0.read().clone()
    }

    /// Replaces the contents with `other`'s, keeping this handle's identity.
    pub(crate) fn replace_with(&self, other: &Inputs) {
        if Arc::ptr_eq(&self.0, &other.0) {
            return;
        }
        let fresh = other.snapshot();
        *self.0.write() = fresh;
    }
}

impl Clone for Inputs {
    fn clone(&self) -> Self {
        Self(Arc::new(RwLock::new(self.snapshot())))
    }
}

impl PartialEq for Inputs {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.snapshot() == other.snapshot()
    }
}

impl Eq for Inputs {}

impl Serialize for Inputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rendered: BTreeMap<Hash32, String> = self
            .0
            .read()
            .iter()
            .map(|(h, v)| (*h, v.to_str_radix(10)))
            .collect();
        rendered.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Inputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<Hash32, String>::deserialize(deserializer)?;
        let mut parsed = BTreeMap::new();
        for (hash, value) in raw {
            let amount = value.parse::<BigUint>().map_err(serde::de::Error::custom)?;
            parsed.insert(hash, amount);
        }
        Ok(Self(Arc::new(RwLock::new(parsed))))
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A vault account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    #[serde(with = "amount")]
    pub balance: BigUint,
    /// Hex-encoded secret key for `Node` accounts, empty otherwise.
    #[serde(default)]
    pub code_hash: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub inputs: Inputs,
    /// BLAKE2b-256 of the passphrase, fixed at creation.
    #[serde(default)]
    pub passphrase: Hash32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
}

impl Account {
    fn blank(address: Address, status: AccountStatus) -> Self {
        Self {
            address,
            nonce: 0,
            balance: BigUint::zero(),
            code_hash: String::new(),
            status,
            inputs: Inputs::new(),
            passphrase: Hash32::default(),
            public_key: None,
        }
    }

    /// A user account created through `account.create`.
    pub fn user(public_key: PublicKey, passphrase: &str) -> Self {
        let mut account = Self::blank(public_key.address(), AccountStatus::User);
        account.passphrase = passphrase_digest(passphrase);
        account.public_key = Some(public_key);
        account
    }

    /// Zero-balance record created on first credit to an unknown address.
    pub fn shadow(address: Address) -> Self {
        Self::blank(address, AccountStatus::User)
    }

    pub fn coinbase(supply: BigUint) -> Self {
        let mut account = Self::blank(Address::coinbase(), AccountStatus::Coinbase);
        account.balance = supply;
        account
    }

    pub fn faucet(supply: BigUint) -> Self {
        let mut account = Self::blank(Address::faucet(), AccountStatus::Faucet);
        account.balance = supply;
        account
    }

    /// The node's own account.
    pub fn node(keypair: &KeyPair) -> Self {
        let mut account = Self::blank(keypair.address(), AccountStatus::Node);
        account.code_hash = hex::encode(keypair.secret_bytes());
        account.passphrase = passphrase_digest("");
        account.public_key = Some(keypair.public_key().clone());
        account
    }

    /// Coinbase and faucet accounts live as long as the vault.
    pub fn is_permanent(&self) -> bool {
        matches!(self.status, AccountStatus::Coinbase | AccountStatus::Faucet)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Overwrites every field with `other`'s while keeping this record's
    /// live inputs handle.
    pub(crate) fn assign_from(&mut self, other: Account) {
        self.inputs.replace_with(&other.inputs);
        self.address = other.address;
        self.nonce = other.nonce;
        self.balance = other.balance;
        self.code_hash = other.code_hash;
        self.status = other.status;
        self.passphrase = other.passphrase;
        self.public_key = other.public_key;
    }
}

/// BLAKE2b-256 of a passphrase.
pub fn passphrase_digest(passphrase: &str) -> Hash32 {
    Hash32::digest(passphrase.as_bytes())
}
