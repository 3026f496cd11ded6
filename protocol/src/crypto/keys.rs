//! # Key Management
//!
//! P-256 keypairs, public keys, and the 32-byte [`Address`] derived from
//! them. A node's identity is the address of its key; user accounts in the
//! vault carry the same kind of address.
//!
//! Node keys live in a PEM file (`--key`). SEC1 (`EC PRIVATE KEY`) and
//! PKCS#8 (`PRIVATE KEY`) encodings are both accepted on load; new files are
//! written as SEC1.
//!
//! Key bytes are never logged.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, LineEnding};
use p256::SecretKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::ADDRESS_LENGTH;
use crate::crypto::hash::{blake2b256, decode_fixed_hex, HashError};

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] HashError),

    #[error("key file {path}: {reason}")]
    KeyFile { path: String, reason: String },
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 32-byte account / validator identifier: BLAKE2b-256 of the
/// uncompressed SEC1 public key.
///
/// Ordered so that multi-account operations can lock in address order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    pub fn from_public_key(key: &PublicKey) -> Self {
        let point = key.0.to_encoded_point(false);
        Self(blake2b256(point.as_bytes()))
    }

    /// The permanent coinbase account, `0xf0..0f`.
    pub const fn coinbase() -> Self {
        Self::special(0x0f)
    }

    /// The permanent faucet account, `0xf0..0a`.
    pub const fn faucet() -> Self {
        Self::special(0x0a)
    }

    const fn special(last: u8) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes[0] = 0xf0;
        bytes[ADDRESS_LENGTH - 1] = last;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex, 66 characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "Address(0x{}..)", hex::encode(&self.0[..6]))
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed_hex::<ADDRESS_LENGTH>(s.trim())?))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A validated P-256 public key. Serialized as compressed SEC1 hex.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(pub(crate) VerifyingKey);

impl PublicKey {
    /// Parses compressed or uncompressed SEC1 bytes.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }

    /// Parity of the point's y coordinate, 0 or 1.
    pub fn parity(&self) -> u8 {
        // Compressed SEC1 tags are 0x02 (even) and 0x03 (odd).
        self.to_bytes()[0] & 1
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A P-256 signing keypair.
///
/// Deliberately not `Serialize`: exporting secret material goes through
/// [`KeyPair::secret_bytes`] or [`KeyPair::to_pem`].
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let signing = SigningKey::from(&secret);
        let public = PublicKey(*signing.verifying_key());
        Self {
            secret,
            signing,
            public,
        }
    }

    /// Builds a keypair from a 32-byte big-endian scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        SecretKey::from_slice(bytes)
            .map(Self::from_secret)
            .map_err(|_| KeyError::InvalidSecretKey)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Parses a SEC1 or PKCS#8 PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        SecretKey::from_sec1_pem(pem)
            .or_else(|_| SecretKey::from_pkcs8_pem(pem))
            .map(Self::from_secret)
            .map_err(|_| KeyError::InvalidSecretKey)
    }

    /// SEC1 PEM encoding of the secret key.
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.secret
            .to_sec1_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|_| KeyError::InvalidSecretKey)
    }

    /// Loads the key at `path`, or generates one and writes it there.
    ///
    /// Returns the keypair and whether it was freshly generated.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool), KeyError> {
        let key_file_err = |reason: String| KeyError::KeyFile {
            path: path.display().to_string(),
            reason,
        };

        if path.exists() {
            let pem = std::fs::read_to_string(path).map_err(|e| key_file_err(e.to_string()))?;
            let keypair = Self::from_pem(&pem)
                .map_err(|_| key_file_err("not a P-256 private key".to_string()))?;
            return Ok((keypair, false));
        }

        let keypair = Self::generate();
        let pem = keypair.to_pem()?;
        std::fs::write(path, pem).map_err(|e| key_file_err(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| key_file_err(e.to_string()))?;
        }

        Ok((keypair, true))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn address(&self) -> Address {
        self.public.address()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Raw 32-byte secret scalar. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
