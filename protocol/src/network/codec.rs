//! # Frame Codec
//!
//! Every node-to-node message travels as one frame:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┬───────────────────┐
//! │ tag (12 B)   │ payload                  │ signature         │
//! │ ASCII, zero- │ canonical JSON, or raw   │ 71 B on signed    │
//! │ padded       │ bytes                    │ tags, else empty  │
//! └──────────────┴──────────────────────────┴───────────────────┘
//! ```
//!
//! Which tags carry a signature is fixed by [`FRAMING`]. The split side
//! uses the same table, so a frame is never sliced by guesswork.
//!
//! The codec does not verify signatures or parse payloads into messages.
//! That is [`message`](super::message)'s job.

use serde::Serialize;
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, TAG_LENGTH};
use crate::crypto::hash::canonical_json;
use crate::crypto::signatures::WireSignature;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown tag {:?}", String::from_utf8_lossy(.raw))]
    UnknownTag { raw: Vec<u8> },

    #[error("unsupported payload shape: {0}")]
    UnsupportedPayloadShape(&'static str),

    #[error("invalid {tag} payload: {source}")]
    InvalidPayload {
        tag: Tag,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Request,
    PrePrepare,
    Prepare,
    Commit,
    Reply,
    Join,
    Sync,
    ReplySync,
    SyncDone,
    OpTx,
    OpAcc,
}

/// Where a frame keeps its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The last [`SIGNATURE_LENGTH`] bytes.
    Signed,
    /// No signature suffix.
    Unsigned,
}

/// Wire name and framing of every tag, in [`Tag::ALL`] order.
pub const FRAMING: [(Tag, &str, Framing); Tag::ALL.len()] = framing_table();

const fn framing_table() -> [(Tag, &'static str, Framing); Tag::ALL.len()] {
    let mut table = [(Tag::Request, "", Framing::Signed); Tag::ALL.len()];
    let mut i = 0;
    while i < Tag::ALL.len() {
        let tag = Tag::ALL[i];
        let (wire, framing) = tag.entry();
        table[i] = (tag, wire, framing);
        i += 1;
    }
    table
}

impl Tag {
    pub const ALL: [Tag; 11] = [
        Tag::Request,
        Tag::PrePrepare,
        Tag::Prepare,
        Tag::Commit,
        Tag::Join,
        Tag::Reply,
        Tag::Sync,
        Tag::ReplySync,
        Tag::SyncDone,
        Tag::OpTx,
        Tag::OpAcc,
    ];

    pub fn as_str(self) -> &'static str {
        self.entry().0
    }

    pub fn framing(self) -> Framing {
        self.entry().1
    }

    pub fn is_signed(self) -> bool {
        self.framing() == Framing::Signed
    }

    /// Looks a tag up by its wire name.
    pub fn from_wire(name: &[u8]) -> Option<Self> {
        FRAMING
            .iter()
            .find(|(_, wire, _)| wire.as_bytes() == name)
            .map(|(tag, _, _)| *tag)
    }

    const fn entry(self) -> (&'static str, Framing) {
        match self {
            Tag::Request => ("Request", Framing::Signed),
            Tag::PrePrepare => ("PrePrepare", Framing::Signed),
            Tag::Prepare => ("Prepare", Framing::Signed),
            Tag::Commit => ("Commit", Framing::Signed),
            Tag::Join => ("Join", Framing::Signed),
            Tag::Reply => ("Reply", Framing::Unsigned),
            Tag::Sync => ("Sync", Framing::Unsigned),
            Tag::ReplySync => ("ReplySync", Framing::Unsigned),
            Tag::SyncDone => ("SyncDone", Framing::Unsigned),
            Tag::OpTx => ("OP_TX", Framing::Unsigned),
            Tag::OpAcc => ("OP_ACC", Framing::Unsigned),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Compose / Split
// ---------------------------------------------------------------------------

/// A frame split into its parts. Borrows the payload from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub tag: Tag,
    pub payload: &'a [u8],
    pub signature: Option<WireSignature>,
}

/// Builds a frame around a struct-shaped payload.
///
/// The payload is rendered as canonical JSON. Anything that does not
/// serialize to a JSON object is rejected with `UnsupportedPayloadShape`.
pub fn compose<T: Serialize + ?Sized>(
    tag: Tag,
    payload: &T,
    signature: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(payload)
        .map_err(|_| CodecError::UnsupportedPayloadShape("payload does not serialize"))?;
    if !value.is_object() {
        return Err(CodecError::UnsupportedPayloadShape(
            "payload must be a struct or raw bytes",
        ));
    }
    let body = canonical_json(&value)
        .map_err(|_| CodecError::UnsupportedPayloadShape("payload does not serialize"))?;
    compose_raw(tag, &body, signature)
}

/// Builds a frame around raw payload bytes.
pub fn compose_raw(tag: Tag, payload: &[u8], signature: &[u8]) -> Result<Vec<u8>, CodecError> {
    match (tag.framing(), signature.len()) {
        (Framing::Signed, SIGNATURE_LENGTH) | (Framing::Unsigned, 0) => {}
        (Framing::Signed, n) => {
            return Err(CodecError::MalformedFrame(format!(
                "{tag} needs a {SIGNATURE_LENGTH}-byte signature, got {n}"
            )))
        }
        (Framing::Unsigned, n) => {
            return Err(CodecError::MalformedFrame(format!(
                "{tag} is unsigned, got a {n}-byte signature"
            )))
        }
    }

    let mut out = Vec::with_capacity(TAG_LENGTH + payload.len() + signature.len());
    let name = tag.as_str().as_bytes();
    out.extend_from_slice(name);
    out.resize(TAG_LENGTH, 0);
    out.extend_from_slice(payload);
    out.extend_from_slice(signature);
    Ok(out)
}

/// Splits a frame into tag, payload and signature.
pub fn split(bytes: &[u8]) -> Result<Frame<'_>, CodecError> {
    if bytes.len() < TAG_LENGTH {
        return Err(CodecError::MalformedFrame(format!(
            "frame of {} bytes is shorter than the tag",
            bytes.len()
        )));
    }

    let (raw_tag, rest) = bytes.split_at(TAG_LENGTH);
    let name_len = raw_tag.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let tag = Tag::from_wire(&raw_tag[..name_len]).ok_or_else(|| CodecError::UnknownTag {
        raw: raw_tag.to_vec(),
    })?;

    match tag.framing() {
        Framing::Unsigned => Ok(Frame {
            tag,
            payload: rest,
            signature: None,
        }),
        Framing::Signed => {
            if rest.len() < SIGNATURE_LENGTH {
                return Err(CodecError::MalformedFrame(format!(
                    "{tag} frame has {} bytes after the tag, needs at least {SIGNATURE_LENGTH}",
                    rest.len()
                )));
            }
            let (payload, sig) = rest.split_at(rest.len() - SIGNATURE_LENGTH);
            let signature = WireSignature::from_slice(sig)
                .ok_or_else(|| CodecError::MalformedFrame("bad signature width".into()))?;
            Ok(Frame {
                tag,
                payload,
                signature: Some(signature),
            })
        }
    }
}
