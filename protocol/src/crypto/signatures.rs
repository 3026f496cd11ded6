//! # Message Signer
//!
//! Deterministic digest, sign, and verify over message payloads, shared by
//! every signed frame on the wire.
//!
//! - `digest(m)` is BLAKE2b-256 over the canonical JSON of `m`. It is the
//!   only input to the signature.
//! - `sign(m, key)` is ECDSA P-256 over `digest(m)`, DER (ASN.1) encoded and
//!   left-padded with zero bytes to exactly [`SIGNATURE_LENGTH`] bytes.
//! - `verify(m, sig, key)` never fails loudly: any malformed input or
//!   mismatch is `false`.
//!
//! ## Why 71 bytes always fits
//!
//! A DER P-256 signature is at most 72 bytes, reached only when both `r` and
//! `s` need a leading zero byte. Signatures are normalized to low-S before
//! encoding, so `s` never needs one and the encoding tops out at 71.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::Signature;
use serde::Serialize;
use thiserror::Error;

use super::hash::{blake2b256, canonical_json, canonicalize_json_str, Hash32, HashError};
use super::keys::{KeyPair, PublicKey};
use crate::config::SIGNATURE_LENGTH;

/// Errors during signing. Verification reports `bool` instead.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing failed")]
    SigningFailed,

    #[error("DER signature is {0} bytes, exceeds the frame width")]
    SignatureTooLong(usize),

    #[error(transparent)]
    Digest(#[from] HashError),
}

/// A frame signature: DER, left-padded with zeros to 71 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WireSignature(pub [u8; SIGNATURE_LENGTH]);

impl WireSignature {
    /// Wraps raw frame bytes. `None` unless exactly 71 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; SIGNATURE_LENGTH]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The DER body with padding stripped.
    pub fn der_bytes(&self) -> &[u8] {
        let start = self
            .0
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(SIGNATURE_LENGTH);
        &self.0[start..]
    }
}

impl std::fmt::Debug for WireSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WireSignature({})", hex::encode(self.der_bytes()))
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// BLAKE2b-256 over the canonical JSON serialization of `message`.
pub fn digest<T: Serialize + ?Sized>(message: &T) -> Result<Hash32, SignerError> {
    Ok(Hash32(blake2b256(&canonical_json(message)?)))
}

/// Digest of a message that travels as a JSON string (the request body).
/// Whitespace and key order in `raw` do not affect the result.
pub fn digest_str(raw: &str) -> Hash32 {
    Hash32(blake2b256(&canonicalize_json_str(raw)))
}

/// Lowercase hex comparison of `digest(message)` against `expected_hex`.
pub fn verify_digest<T: Serialize + ?Sized>(message: &T, expected_hex: &str) -> bool {
    match digest(message) {
        Ok(d) => d.to_hex() == expected_hex.to_ascii_lowercase(),
        Err(_) => false,
    }
}

/// [`verify_digest`] for string-carried request bodies.
pub fn verify_digest_str(raw: &str, expected_hex: &str) -> bool {
    digest_str(raw).to_hex() == expected_hex.to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Sign / Verify
// ---------------------------------------------------------------------------

/// Signs `digest(message)` and returns the padded 71-byte frame signature.
pub fn sign<T: Serialize + ?Sized>(
    message: &T,
    keypair: &KeyPair,
) -> Result<WireSignature, SignerError> {
    sign_digest(&digest(message)?, keypair)
}

/// Signs an already computed digest.
pub fn sign_digest(digest: &Hash32, keypair: &KeyPair) -> Result<WireSignature, SignerError> {
    let signature = sign_prehash(digest, keypair)?;
    let der = signature.to_der();
    let der = der.as_bytes();
    if der.len() > SIGNATURE_LENGTH {
        return Err(SignerError::SignatureTooLong(der.len()));
    }

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[SIGNATURE_LENGTH - der.len()..].copy_from_slice(der);
    Ok(WireSignature(out))
}

/// Recomputes the digest of `message` and checks the frame signature.
pub fn verify<T: Serialize + ?Sized>(
    message: &T,
    signature: &WireSignature,
    public_key: &PublicKey,
) -> bool {
    match digest(message) {
        Ok(d) => verify_digest_signature(&d, signature, public_key),
        Err(_) => false,
    }
}

/// Checks a frame signature against a known digest.
pub fn verify_digest_signature(
    digest: &Hash32,
    signature: &WireSignature,
    public_key: &PublicKey,
) -> bool {
    let Ok(parsed) = Signature::from_der(signature.der_bytes()) else {
        return false;
    };
    public_key
        .verifying_key()
        .verify_prehash(digest.as_bytes(), &parsed)
        .is_ok()
}

// ---------------------------------------------------------------------------
// Fixed-width (r, s) signatures
// ---------------------------------------------------------------------------

/// Signs a 32-byte hash and returns `r || s` as 64 big-endian bytes.
/// Used for transaction signatures.
pub fn sign_hash_fixed(hash: &Hash32, keypair: &KeyPair) -> Result<[u8; 64], SignerError> {
    let signature = sign_prehash(hash, keypair)?;
    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Verifies an `r || s` signature over a 32-byte hash.
pub fn verify_hash_fixed(hash: &Hash32, rs: &[u8; 64], public_key: &PublicKey) -> bool {
    let Ok(parsed) = Signature::from_slice(rs) else {
        return false;
    };
    public_key
        .verifying_key()
        .verify_prehash(hash.as_bytes(), &parsed)
        .is_ok()
}

fn sign_prehash(digest: &Hash32, keypair: &KeyPair) -> Result<Signature, SignerError> {
    let signature: Signature = keypair
        .signing_key()
        .sign_prehash(digest.as_bytes())
        .map_err(|_| SignerError::SigningFailed)?;
    Ok(signature.normalize_s().unwrap_or(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Vote {
        digest: String,
        seq: u64,
    }

    #[test]
    fn signature_is_always_71_bytes_and_verifies() {
        let kp = KeyPair::generate();
        for seq in 0..64u64 {
            let msg = Vote {
                digest: "ab".repeat(32),
                seq,
            };
            let sig = sign(&msg, &kp).unwrap();
            assert_eq!(sig.as_bytes().len(), SIGNATURE_LENGTH);
            assert_eq!(sig.der_bytes()[0], 0x30, "DER sequence tag");
            assert!(verify(&msg, &sig, kp.public_key()));
        }
    }

    #[test]
    fn verify_rejects_other_message_and_other_key() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let msg = Vote {
            digest: "00".into(),
            seq: 1,
        };
        let sig = sign(&msg, &kp).unwrap();

        let tampered = Vote {
            digest: "00".into(),
            seq: 2,
        };
        assert!(!verify(&tampered, &sig, kp.public_key()));
        assert!(!verify(&msg, &sig, other.public_key()));
    }

    #[test]
    fn verify_never_panics_on_garbage() {
        let kp = KeyPair::generate();
        let garbage = WireSignature([0xAB; SIGNATURE_LENGTH]);
        assert!(!verify(&json!({"a": 1}), &garbage, kp.public_key()));
        let zeros = WireSignature([0u8; SIGNATURE_LENGTH]);
        assert!(!verify(&json!({"a": 1}), &zeros, kp.public_key()));
    }

    #[test]
    fn wire_signature_requires_exact_width() {
        assert!(WireSignature::from_slice(&[0u8; 70]).is_none());
        assert!(WireSignature::from_slice(&[0u8; 72]).is_none());
        assert!(WireSignature::from_slice(&[0u8; 71]).is_some());
    }

    #[test]
    fn digest_is_stable_across_field_order() {
        let a = json!({"seq": 1, "digest": "x"});
        let b = json!({"digest": "x", "seq": 1});
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
        assert_eq!(
            digest_str(r#"{"seq":1,"digest":"x"}"#),
            digest_str(r#"{ "digest" : "x", "seq" : 1 }"#),
        );
    }

    #[test]
    fn verify_digest_compares_lowercase_hex() {
        let msg = json!({"k": "v"});
        let d = digest(&msg).unwrap().to_hex();
        assert!(verify_digest(&msg, &d));
        assert!(verify_digest(&msg, &d.to_uppercase()));
        assert!(!verify_digest(&msg, &"00".repeat(32)));
        assert!(verify_digest_str(r#"{"k":"v"}"#, &d));
    }

    #[test]
    fn fixed_signatures_roundtrip() {
        let kp = KeyPair::generate();
        let h = Hash32::digest(b"tx");
        let rs = sign_hash_fixed(&h, &kp).unwrap();
        assert!(verify_hash_fixed(&h, &rs, kp.public_key()));
        assert!(!verify_hash_fixed(&Hash32::digest(b"other"), &rs, kp.public_key()));
    }
}
