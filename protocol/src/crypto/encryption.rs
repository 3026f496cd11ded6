//! # Vault Record Encryption
//!
//! AES-256 in CFB mode with a fresh random 16-byte IV per record. This is
//! the on-disk format of `vault.dat` and existing vault files depend on it.
//!
//! ## Record layout
//!
//! `seal()` returns `IV(16) || ciphertext`. CFB is a stream mode, so the
//! ciphertext is exactly as long as the plaintext and there is no padding
//! to strip on the way back.
//!
//! ## What this does not give you
//!
//! CFB has no authentication tag. A flipped bit decrypts to a flipped bit
//! one block later, and the vault relies on the JSON parser to reject the
//! result. Tampering that happens to produce valid JSON goes unnoticed.
//!
//! ## Key derivation
//!
//! The vault key is BLAKE2b-256 over a domain tag and the owning node's
//! secret key, so the same node key always reopens the same vault.

use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;
use thiserror::Error;

use crate::config::{VAULT_IV_LENGTH, VAULT_KEY_LENGTH};
use crate::crypto::hash::blake2b256_parts;

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// Domain separator mixed into the vault key.
const VAULT_KEY_DOMAIN: &[u8] = b"cerera/vault";

/// Errors from sealing and opening vault records.
///
/// CFB cannot tell a wrong key from corrupted bytes; both surface later as
/// a deserialization failure in the caller.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("invalid key or IV length")]
    InvalidKeyLength,

    #[error("record too short: must be at least {VAULT_IV_LENGTH} bytes")]
    RecordTooShort,
}

/// A 32-byte symmetric key for vault records.
#[derive(Clone)]
pub struct VaultKey([u8; VAULT_KEY_LENGTH]);

impl VaultKey {
    /// Derives the vault key from the owning node's secret scalar.
    pub fn derive(node_secret: &[u8]) -> Self {
        Self(blake2b256_parts(&[VAULT_KEY_DOMAIN, node_secret]))
    }

    pub fn from_bytes(bytes: [u8; VAULT_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VAULT_KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Encrypts `plaintext` under a random IV and returns `IV || ciphertext`.
///
/// ```
/// use cerera_protocol::crypto::encryption::{open, seal, VaultKey};
///
/// let key = VaultKey::derive(b"node secret");
/// let sealed = seal(&key, b"{\"nonce\":0}").unwrap();
/// assert_eq!(open(&key, &sealed).unwrap(), b"{\"nonce\":0}");
/// ```
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let mut iv = [0u8; VAULT_IV_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    seal_with_iv(key, &iv, plaintext)
}

/// Deterministic variant of [`seal`] for a caller-chosen IV.
pub fn seal_with_iv(
    key: &VaultKey,
    iv: &[u8; VAULT_IV_LENGTH],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256CfbEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| EncryptionError::InvalidKeyLength)?;

    let mut out = Vec::with_capacity(VAULT_IV_LENGTH + plaintext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(plaintext);
    cipher.encrypt(&mut out[VAULT_IV_LENGTH..]);
    Ok(out)
}

/// Decrypts a record produced by [`seal`].
///
/// Always succeeds for well-sized input; whether the plaintext is
/// meaningful is for the caller to decide.
pub fn open(key: &VaultKey, record: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if record.len() < VAULT_IV_LENGTH {
        return Err(EncryptionError::RecordTooShort);
    }
    let (iv, body) = record.split_at(VAULT_IV_LENGTH);
    let cipher = Aes256CfbDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| EncryptionError::InvalidKeyLength)?;

    let mut out = body.to_vec();
    cipher.decrypt(&mut out);
    Ok(out)
}
