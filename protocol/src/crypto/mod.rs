//! # Cryptographic Primitives
//!
//! Every digest, signature, and encrypted vault record in the node flows
//! through this module. The choices are fixed by the wire format that
//! existing peers speak:
//!
//! - **BLAKE2b-256** for digests, transaction hashes, and addresses.
//! - **ECDSA P-256** for frame and transaction signatures, DER-encoded
//!   and padded to 71 bytes on the wire.
//! - **AES-256-CFB** for vault records, one random IV per record.
//! - **BIP39** phrases with an HMAC-SHA512 master key for account recovery.
//!
//! Everything here is a thin, typed wrapper around the RustCrypto crates.
//! None of it implements a primitive by hand.

pub mod encryption;
pub mod hash;
pub mod keys;
pub mod mnemonic;
pub mod signatures;

pub use encryption::{open, seal, VaultKey};
pub use hash::{blake2b256, canonical_json, Hash32};
pub use keys::{Address, KeyPair, PublicKey};
pub use signatures::{digest, sign, verify, verify_digest, WireSignature};
