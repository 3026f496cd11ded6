//! Core type definitions for Cerera transactions.
//!
//! Amounts are arbitrary-precision unsigned integers. They travel as
//! decimal strings in JSON so that values above 2^53 survive any client.

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TxKind
// ---------------------------------------------------------------------------

/// Discriminant for the operation a transaction represents.
///
/// The kind decides which account funds the transfer: the sender for
/// `Transfer`, the faucet account for `Faucet`, the coinbase account for
/// `Coinbase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    /// Value transfer paid for by the sender, gas burned.
    Transfer,
    /// Test-network drop funded by the faucet account.
    Faucet,
    /// Reward or genesis allocation funded by the coinbase account.
    Coinbase,
}

impl TxKind {
    /// Stable one-byte discriminant used in the transaction hash.
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Transfer => 0x00,
            Self::Faucet => 0x01,
            Self::Coinbase => 0x02,
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer => write!(f, "Transfer"),
            Self::Faucet => write!(f, "Faucet"),
            Self::Coinbase => write!(f, "Coinbase"),
        }
    }
}

// ---------------------------------------------------------------------------
// TxSignature
// ---------------------------------------------------------------------------

/// ECDSA P-256 signature over the transaction hash.
///
/// `r` and `s` are 32-byte big-endian values in lowercase hex. `v` is the
/// parity of the signer's public key and lets a verifier reject a wrong key
/// before doing any curve arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

// ---------------------------------------------------------------------------
// Amount serde
// ---------------------------------------------------------------------------

/// Serde adapter for [`BigUint`] as a decimal string.
///
/// Deserialization also accepts a plain JSON integer.
pub mod amount {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(BigUint::from(n)),
        }
    }
}

/// Parses a decimal amount string. Used by RPC handlers.
pub fn parse_amount(s: &str) -> Option<BigUint> {
    s.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "amount")]
        value: BigUint,
    }

    #[test]
    fn kind_bytes_are_distinct() {
        let bytes = [
            TxKind::Transfer.as_byte(),
            TxKind::Faucet.as_byte(),
            TxKind::Coinbase.as_byte(),
        ];
        assert_ne!(bytes[0], bytes[1]);
        assert_ne!(bytes[1], bytes[2]);
        assert_ne!(bytes[0], bytes[2]);
    }

    #[test]
    fn amount_serializes_as_decimal_string() {
        let big: BigUint = "123456789012345678901234567890".parse().unwrap();
        let json = serde_json::to_string(&Holder { value: big.clone() }).unwrap();
        assert_eq!(json, r#"{"value":"123456789012345678901234567890"}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, big);
    }

    #[test]
    fn amount_accepts_json_numbers() {
        let back: Holder = serde_json::from_str(r#"{"value":42}"#).unwrap();
        assert_eq!(back.value, BigUint::from(42u32));
        assert!(serde_json::from_str::<Holder>(r#"{"value":"-1"}"#).is_err());
    }

    #[test]
    fn parse_amount_rejects_garbage() {
        assert_eq!(parse_amount(" 10 "), Some(BigUint::from(10u32)));
        assert_eq!(parse_amount("ten"), None);
    }
}
