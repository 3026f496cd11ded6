use num_bigint::BigUint;
use thiserror::Error;

use crate::crypto::encryption::EncryptionError;
use crate::crypto::keys::Address;
use crate::crypto::mnemonic::MnemonicError;

/// Errors from the account vault.
///
/// RPC callers see the `Display` text of these, so messages name the
/// account involved but never the passphrase or key material.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("insufficient inputs on {address}: need {needed}, have {available}")]
    InsufficientInputs {
        address: Address,
        needed: BigUint,
        available: BigUint,
    },

    #[error("faucet balance {available} cannot cover {needed}")]
    FaucetInsufficient { needed: BigUint, available: BigUint },

    #[error("faucet limit: {0}")]
    FaucetLimit(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("wrong credentials")]
    WrongCredentials,

    #[error("vault already exists at {0}")]
    VaultAlreadyExists(String),

    #[error("vault corruption: {0}")]
    VaultCorruption(String),

    #[error("account {0} is permanent and cannot be removed")]
    PermanentAccount(Address),

    #[error(transparent)]
    Mnemonic(#[from] MnemonicError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("account serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub(crate) fn not_found(address: &Address) -> Self {
        Self::AccountNotFound(address.to_string())
    }
}
