//! Typed node-to-node messages.
//!
//! JSON field names are fixed by peers already on the network (`viewID`,
//! `sequenceID`, `nodeid`, ...). Rust field names follow Rust conventions
//! and are renamed on the wire.
//!
//! Signed messages are wrapped in [`Signed`], which carries the 71-byte
//! frame signature over `digest(msg)`. [`Message::decode`] parses a frame
//! but does not check any signature. The driver does that once it knows
//! whose key to use.

use serde::{Deserialize, Serialize};

use super::codec::{self, CodecError, Tag};
use crate::crypto::hash::Hash32;
use crate::crypto::keys::{Address, KeyPair, PublicKey};
use crate::crypto::signatures::{self, digest_str, SignerError, WireSignature};
use crate::transaction::Transaction;
use crate::vault::Account;

/// `type` value of a [`ReplySyncMsg`].
pub const REPLY_SYNC_TYPE: u8 = 0x1;

/// `result` value of a [`SyncDoneMsg`].
pub const SYNC_DONE_RESULT: &str = "DONE";

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Consensus messages
// ---------------------------------------------------------------------------

/// A client message plus the digest of its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// The operation body, a JSON document carried as a string.
    pub message: String,
    /// Lowercase hex BLAKE2b-256 of the canonical `message`.
    pub digest: String,
}

impl ClientRequest {
    pub fn new(message: String) -> Self {
        let digest = digest_str(&message).to_hex();
        Self { message, digest }
    }

    /// Wraps a transaction as the request body.
    pub fn for_transaction(tx: &Transaction) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(tx)?))
    }

    /// Whether `digest` matches `message`.
    pub fn digest_matches(&self) -> bool {
        signatures::verify_digest_str(&self.message, &self.digest)
    }

    pub fn transaction(&self) -> Result<Transaction, serde_json::Error> {
        serde_json::from_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMsg {
    pub operation: String,
    pub timestamp: i64,
    #[serde(rename = "clientID")]
    pub client_id: Address,
    pub request: ClientRequest,
}

impl RequestMsg {
    pub fn new(operation: impl Into<String>, client_id: Address, request: ClientRequest) -> Self {
        Self {
            operation: operation.into(),
            timestamp: unix_now(),
            client_id,
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepareMsg {
    pub request: RequestMsg,
    pub digest: String,
    #[serde(rename = "viewID")]
    pub view_id: u64,
    #[serde(rename = "sequenceID")]
    pub sequence_id: u64,
    #[serde(rename = "blockHeight", default)]
    pub block_height: u64,
}

/// Body of both `Prepare` and `Commit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub digest: String,
    #[serde(rename = "viewID")]
    pub view_id: u64,
    #[serde(rename = "sequenceID")]
    pub sequence_id: u64,
    #[serde(rename = "nodeid")]
    pub node_id: Address,
    #[serde(rename = "blockHeight", default)]
    pub block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMsg {
    #[serde(rename = "viewID")]
    pub view_id: u64,
    pub timestamp: i64,
    #[serde(rename = "clientID")]
    pub client_id: Address,
    #[serde(rename = "nodeid")]
    pub node_id: Address,
    pub result: String,
}

// ---------------------------------------------------------------------------
// Membership and state transfer
// ---------------------------------------------------------------------------

/// A node asking the primary to admit it.
///
/// Self-certifying: `address` must be the address of `public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMsg {
    pub address: Address,
    #[serde(rename = "publicKey")]
    pub public_key: PublicKey,
    /// The joiner's own state account.
    pub account: Account,
    pub timestamp: i64,
    /// Where the joiner accepts frames, `host:port`.
    #[serde(rename = "network")]
    pub network_addr: String,
}

impl JoinMsg {
    pub fn is_self_certifying(&self) -> bool {
        self.public_key.address() == self.address
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMsg {
    pub seq: u64,
    pub target: Address,
    pub payload: Account,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySyncMsg {
    pub timestamp: i64,
    #[serde(rename = "clientID")]
    pub client_id: Address,
    #[serde(rename = "type")]
    pub kind: u8,
    pub payload: Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDoneMsg {
    pub timestamp: i64,
    pub result: String,
}

impl SyncDoneMsg {
    pub fn done() -> Self {
        Self {
            timestamp: unix_now(),
            result: SYNC_DONE_RESULT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signed wrapper
// ---------------------------------------------------------------------------

/// A message with its frame signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signed<T> {
    pub msg: T,
    pub signature: WireSignature,
}

impl<T: Serialize> Signed<T> {
    pub fn new(msg: T, keypair: &KeyPair) -> Result<Self, SignerError> {
        let signature = signatures::sign(&msg, keypair)?;
        Ok(Self { msg, signature })
    }

    /// Recomputes `digest(msg)` and checks the signature. Never fails loudly.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        signatures::verify(&self.msg, &self.signature, public_key)
    }

    pub fn digest(&self) -> Result<Hash32, SignerError> {
        signatures::digest(&self.msg)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every frame the node understands, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Signed<RequestMsg>),
    PrePrepare(Signed<PrePrepareMsg>),
    Prepare(Signed<VoteMsg>),
    Commit(Signed<VoteMsg>),
    Reply(ReplyMsg),
    Join(Signed<JoinMsg>),
    Sync(SyncMsg),
    ReplySync(ReplySyncMsg),
    SyncDone(SyncDoneMsg),
    OpTx(Transaction),
    OpAcc(Account),
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Request(_) => Tag::Request,
            Self::PrePrepare(_) => Tag::PrePrepare,
            Self::Prepare(_) => Tag::Prepare,
            Self::Commit(_) => Tag::Commit,
            Self::Reply(_) => Tag::Reply,
            Self::Join(_) => Tag::Join,
            Self::Sync(_) => Tag::Sync,
            Self::ReplySync(_) => Tag::ReplySync,
            Self::SyncDone(_) => Tag::SyncDone,
            Self::OpTx(_) => Tag::OpTx,
            Self::OpAcc(_) => Tag::OpAcc,
        }
    }

    /// Renders the frame, without the transport delimiter.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let tag = self.tag();
        match self {
            Self::Request(s) => codec::compose(tag, &s.msg, s.signature.as_bytes()),
            Self::PrePrepare(s) => codec::compose(tag, &s.msg, s.signature.as_bytes()),
            Self::Prepare(s) | Self::Commit(s) => {
                codec::compose(tag, &s.msg, s.signature.as_bytes())
            }
            Self::Join(s) => codec::compose(tag, &s.msg, s.signature.as_bytes()),
            Self::Reply(m) => codec::compose(tag, m, &[]),
            Self::Sync(m) => codec::compose(tag, m, &[]),
            Self::ReplySync(m) => codec::compose(tag, m, &[]),
            Self::SyncDone(m) => codec::compose(tag, m, &[]),
            Self::OpTx(tx) => codec::compose(tag, tx, &[]),
            Self::OpAcc(account) => codec::compose(tag, account, &[]),
        }
    }

    /// Splits and parses a frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let frame = codec::split(bytes)?;
        let tag = frame.tag;
        let parse_err = |source| CodecError::InvalidPayload { tag, source };

        macro_rules! signed {
            ($variant:ident) => {{
                let signature = frame
                    .signature
                    .ok_or_else(|| CodecError::MalformedFrame(format!("{tag} without signature")))?;
                let msg = serde_json::from_slice(frame.payload).map_err(parse_err)?;
                Self::$variant(Signed { msg, signature })
            }};
        }
        macro_rules! plain {
            ($variant:ident) => {{
                Self::$variant(serde_json::from_slice(frame.payload).map_err(parse_err)?)
            }};
        }

        Ok(match tag {
            Tag::Request => signed!(Request),
            Tag::PrePrepare => signed!(PrePrepare),
            Tag::Prepare => signed!(Prepare),
            Tag::Commit => signed!(Commit),
            Tag::Join => signed!(Join),
            Tag::Reply => plain!(Reply),
            Tag::Sync => plain!(Sync),
            Tag::ReplySync => plain!(ReplySync),
            Tag::SyncDone => plain!(SyncDone),
            Tag::OpTx => plain!(OpTx),
            Tag::OpAcc => plain!(OpAcc),
        })
    }
}
