//! # Hashing Utilities
//!
//! BLAKE2b with a 256-bit output is the only hash function on the
//! consensus path. It produces message digests, transaction hashes,
//! addresses, passphrase digests, and the vault key.
//!
//! ## Canonical JSON
//!
//! Digests are taken over a canonical JSON rendering: the value is first
//! lowered to a `serde_json::Value` (whose objects are ordered maps, so keys
//! come out sorted) and then written without whitespace. Two messages with
//! the same fields therefore hash identically regardless of the field order
//! or formatting they arrived in.

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::HASH_LENGTH;

type Blake2b256 = Blake2b<U32>;

/// Errors from hex parsing and canonical serialization.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("canonical serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// BLAKE2b-256 of `data`.
///
/// ```
/// use cerera_protocol::crypto::hash::blake2b256;
///
/// assert_eq!(blake2b256(b"cerera").len(), 32);
/// ```
pub fn blake2b256(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    finish(hasher)
}

/// BLAKE2b-256 over the concatenation of several parts.
pub fn blake2b256_parts(parts: &[&[u8]]) -> [u8; HASH_LENGTH] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    finish(hasher)
}

fn finish(hasher: Blake2b256) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Canonical JSON bytes of a serializable value: sorted keys, no whitespace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Re-renders an arbitrary JSON document canonically.
///
/// Used for request bodies that travel as strings: the digest must not
/// depend on how the sender formatted them. Input that is not JSON is
/// hashed as-is.
pub fn canonicalize_json_str(raw: &str) -> Vec<u8> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|_| raw.as_bytes().to_vec()),
        Err(_) => raw.as_bytes().to_vec(),
    }
}

/// Parses canonical JSON bytes back into a value.
pub fn from_canonical_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, HashError> {
    Ok(serde_json::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Hex helpers
// ---------------------------------------------------------------------------

/// Lowercase `0x`-prefixed hex.
pub fn to_prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes hex with or without a `0x` prefix into exactly `N` bytes.
pub fn decode_fixed_hex<const N: usize>(s: &str) -> Result<[u8; N], HashError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| HashError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(HashError::InvalidLength {
            expected: N,
            got: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Hash32
// ---------------------------------------------------------------------------

/// A 32-byte digest. Serialized as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; HASH_LENGTH]);

impl Hash32 {
    /// Hashes `data` with BLAKE2b-256.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake2b256(data))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Lowercase hex without prefix. This is the form used for message
    /// digests on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self)
    }
}

impl FromStr for Hash32 {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed_hex::<HASH_LENGTH>(s).map(Self)
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for byte vectors as plain lowercase hex.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(trimmed).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blake2b_is_deterministic_and_32_bytes() {
        let a = blake2b256(b"cerera");
        let b = blake2b256(b"cerera");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, blake2b256(b"cererA"));
    }

    #[test]
    fn blake2b_of_empty_input_matches_known_vector() {
        // BLAKE2b-256("") from the reference implementation.
        assert_eq!(
            hex::encode(blake2b256(b"")),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn parts_hash_equals_concatenation() {
        assert_eq!(
            blake2b256_parts(&[&b"ab"[..], &b"cd"[..]]),
            blake2b256(b"abcd"),
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": 2});
        let bytes = canonical_json(&a).unwrap();
        assert_eq!(bytes, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonicalize_ignores_whitespace_and_order() {
        let one = canonicalize_json_str(r#"{ "x": 1,  "y": [1, 2] }"#);
        let two = canonicalize_json_str(r#"{"y":[1,2],"x":1}"#);
        assert_eq!(one, two);
    }

    #[test]
    fn canonicalize_passes_non_json_through() {
        assert_eq!(canonicalize_json_str("not json"), b"not json");
    }

    #[test]
    fn hash32_display_and_parse_roundtrip() {
        let h = Hash32::digest(b"tx");
        let shown = h.to_string();
        assert!(shown.starts_with("0x"));
        assert_eq!(shown.parse::<Hash32>().unwrap(), h);
        assert_eq!(h.to_hex().len(), 64);
    }

    #[test]
    fn decode_fixed_hex_rejects_wrong_length() {
        let err = decode_fixed_hex::<32>("0xabcd").unwrap_err();
        assert!(matches!(
            err,
            HashError::InvalidLength {
                expected: 32,
                got: 2
            }
        ));
        assert!(decode_fixed_hex::<2>("zz11").is_err());
    }
}
