//! Validator membership.
//!
//! A [`ValidatorSet`] is a plain value. The driver keeps the live set
//! behind a read/write lock and copies it into an `Arc` when a round
//! starts, so a `Join` mid-round only affects later rounds.
//!
//! Order is insertion order and decides the primary: `view mod n`. Nodes
//! build the set from the same peers file, so they agree on it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::{Address, PublicKey};

/// One validator: identity, verification key, and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: Address,
    pub public_key: PublicKey,
    /// `host:port`. Empty when the validator is only known by key.
    pub network_addr: String,
}

impl ValidatorInfo {
    pub fn new(public_key: PublicKey, network_addr: impl Into<String>) -> Self {
        Self {
            address: public_key.address(),
            public_key,
            network_addr: network_addr.into(),
        }
    }
}

/// PBFT quorum for `n` validators: `2f + 1` with `f = (n - 1) / 3`.
pub fn quorum_for(n: usize) -> usize {
    2 * (n.saturating_sub(1) / 3) + 1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_validators(validators: impl IntoIterator<Item = ValidatorInfo>) -> Self {
        let mut set = Self::new();
        for v in validators {
            set.add(v);
        }
        set
    }

    /// Adds a validator. A known address keeps its position and gets the
    /// new key and network address.
    pub fn add(&mut self, info: ValidatorInfo) -> bool {
        match self.validators.iter_mut().find(|v| v.address == info.address) {
            Some(existing) => {
                *existing = info;
                false
            }
            None => {
                self.validators.push(info);
                true
            }
        }
    }

    pub fn remove(&mut self, address: &Address) -> Option<ValidatorInfo> {
        let pos = self.validators.iter().position(|v| &v.address == address)?;
        Some(self.validators.remove(pos))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.validators.iter().any(|v| &v.address == address)
    }

    pub fn get(&self, address: &Address) -> Option<&ValidatorInfo> {
        self.validators.iter().find(|v| &v.address == address)
    }

    pub fn public_key(&self, address: &Address) -> Option<&PublicKey> {
        self.get(address).map(|v| &v.public_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.iter()
    }

    pub fn addresses(&self) -> BTreeSet<Address> {
        self.validators.iter().map(|v| v.address).collect()
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn quorum(&self) -> usize {
        quorum_for(self.size())
    }

    /// The primary for `view`, or `None` for an empty set.
    pub fn primary(&self, view: u64) -> Option<&ValidatorInfo> {
        if self.validators.is_empty() {
            return None;
        }
        let index = (view % self.validators.len() as u64) as usize;
        self.validators.get(index)
    }
}

/// Equal when the address sets are equal. Order and network addresses do
/// not matter.
impl PartialEq for ValidatorSet {
    fn eq(&self, other: &Self) -> bool {
        self.addresses() == other.addresses()
    }
}

impl Eq for ValidatorSet {}
