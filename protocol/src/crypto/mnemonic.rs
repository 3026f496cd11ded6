//! # Recovery Phrases & Account Key Derivation
//!
//! Accounts are created from 256 bits of entropy rendered as a 24-word
//! BIP39 phrase. The passphrase is mixed into the BIP39 seed, so the same
//! phrase under a different passphrase yields a different account.
//!
//! Derivation chain:
//!
//! ```text
//! entropy(32) -> mnemonic(24 words)
//!             -> seed = BIP39(mnemonic, passphrase)        (64 bytes)
//!             -> master = HMAC-SHA512("Bitcoin seed", seed) (64 bytes)
//!             -> account secret = BLAKE2b-256(master || "cerera/account/<i>")
//! ```
//!
//! `i` starts at 0 and is only bumped in the astronomically unlikely case
//! that the hash is not a valid P-256 scalar.

use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;
use thiserror::Error;

use crate::config::MNEMONIC_WORDS;
use crate::crypto::hash::blake2b256_parts;
use crate::crypto::keys::KeyPair;

type HmacSha512 = Hmac<Sha512>;

const MASTER_KEY_DOMAIN: &[u8] = b"Bitcoin seed";

/// Errors from phrase parsing and key derivation.
#[derive(Debug, Error)]
pub enum MnemonicError {
    #[error("mnemonic phrase cannot be empty")]
    Empty,

    #[error("mnemonic must have {MNEMONIC_WORDS} words, got {0}")]
    WrongWordCount(usize),

    #[error("invalid mnemonic: {0}")]
    Invalid(String),

    #[error("key derivation failed")]
    Derivation,
}

/// Everything derived from one phrase + passphrase pair.
#[derive(Debug, Clone)]
pub struct DerivedAccount {
    pub mnemonic: String,
    /// HMAC-SHA512 master key (secret || chain code), lowercase hex.
    pub master_key: String,
    pub keypair: KeyPair,
}

/// Generates a fresh 24-word phrase and derives its account key.
pub fn generate(passphrase: &str) -> Result<DerivedAccount, MnemonicError> {
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| MnemonicError::Invalid(e.to_string()))?;
    derive(&mnemonic, passphrase)
}

/// Re-derives the account key from an existing phrase.
pub fn recover(phrase: &str, passphrase: &str) -> Result<DerivedAccount, MnemonicError> {
    let mnemonic = parse(phrase)?;
    derive(&mnemonic, passphrase)
}

/// Parses and checks a phrase. Whitespace between words is normalized.
pub fn parse(phrase: &str) -> Result<Mnemonic, MnemonicError> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(MnemonicError::Empty);
    }
    let words = normalized.split(' ').count();
    if words != MNEMONIC_WORDS {
        return Err(MnemonicError::WrongWordCount(words));
    }
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| MnemonicError::Invalid(e.to_string()))
}

fn derive(mnemonic: &Mnemonic, passphrase: &str) -> Result<DerivedAccount, MnemonicError> {
    let seed = mnemonic.to_seed(passphrase);

    let mut mac =
        HmacSha512::new_from_slice(MASTER_KEY_DOMAIN).map_err(|_| MnemonicError::Derivation)?;
    mac.update(&seed);
    let master = mac.finalize().into_bytes();

    let keypair = account_key(&master)?;
    Ok(DerivedAccount {
        mnemonic: mnemonic.to_string(),
        master_key: hex::encode(master),
        keypair,
    })
}

fn account_key(master: &[u8]) -> Result<KeyPair, MnemonicError> {
    for index in 0u8..=u8::MAX {
        let label = format!("cerera/account/{index}");
        let candidate = blake2b256_parts(&[master, label.as_bytes()]);
        if let Ok(keypair) = KeyPair::from_secret_bytes(&candidate) {
            return Ok(keypair);
        }
    }
    Err(MnemonicError::Derivation)
}
