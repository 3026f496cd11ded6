//! # Consensus Module — Single-View PBFT
//!
//! Three-phase agreement on one client request per round, among a fixed
//! validator snapshot. The view never changes: the primary is validator
//! `0 mod n` in peers-file order, and a round whose deadline passes is
//! simply dropped.
//!
//! ## Architecture
//!
//! ```text
//! validator_set.rs — ValidatorSet, quorum arithmetic, primary selection
//! round.rs         — RoundState vote logs and the RoundRegistry
//! driver.rs        — ConsensusDriver: inbox loop and message handlers
//! metrics.rs       — Prometheus counters for drops and round outcomes
//! ```
//!
//! ## Message flow
//!
//! ```text
//! client ──Request──▶ primary ──PrePrepare──▶ backups
//!                        │                      │
//!                        └───────Prepare◀───────┘  (2f+1, pre-prepare counts)
//!                        └───────Commit ◀───────┘  (2f+1)
//!                                   │
//!                         execute, append block, Reply ──▶ client
//! ```
//!
//! ## Failure handling
//!
//! Every handler returns a [`ConsensusError`] when it drops a message. The
//! driver logs it at `warn`, bumps the per-reason counter and moves on.
//! Nothing a peer sends can stop the driver.

pub mod driver;
pub mod metrics;
pub mod round;
pub mod validator_set;

pub use driver::{ConsensusDriver, DriverConfig, DriverDeps};
pub use metrics::ConsensusMetrics;
pub use round::{RoundKey, RoundRegistry, RoundStage, RoundState};
pub use validator_set::{quorum_for, ValidatorInfo, ValidatorSet};

use thiserror::Error;

use crate::crypto::keys::Address;
use crate::network::codec::CodecError;
use crate::transaction::TxError;

/// Why the driver dropped a message.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("request digest does not match its message")]
    RequestDigestMismatch,

    #[error("request signature from {0} does not verify")]
    RequestSignatureInvalid(Address),

    #[error("no public key known for client {0}")]
    UnknownClient(Address),

    #[error("request transaction is not valid: {0}")]
    TransactionInvalid(#[from] TxError),

    #[error("no public key known for sender {0}")]
    UnknownSender(Address),

    #[error("pre-prepare signature does not verify against the primary")]
    PrePrepareSignatureInvalid,

    #[error("pre-prepare digest {got} does not match request digest {expected}")]
    PrePrepareDigestMismatch { expected: String, got: String },

    #[error("pre-prepare for {round} conflicts with digest {existing}")]
    ConflictingPrePrepare { round: String, existing: String },

    #[error("message for view {view} signed by a validator other than its primary")]
    WrongPrimary { view: u64 },

    #[error("this node is not the primary")]
    NotPrimary,

    #[error("round {0} has no primary")]
    NoPrimary(String),

    #[error("prepare for {0} arrived before its pre-prepare")]
    PrepareWithoutPrePrepare(String),

    #[error("no request with digest {0} in this round")]
    UnknownRequest(String),

    #[error("vote from non-validator {0}")]
    VoteFromNonValidator(Address),

    #[error("vote signature from {0} does not verify")]
    VoteSignatureInvalid(Address),

    #[error("round {0} has expired")]
    RoundExpired(String),

    #[error("join from {0} is not self-certifying or badly signed")]
    InvalidJoin(Address),

    #[error("message cannot be signed: {0}")]
    Signing(String),

    #[error("{0}")]
    Rejected(String),
}

impl ConsensusError {
    /// Metric label for this drop reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Codec(_) => "malformed_frame",
            Self::RequestDigestMismatch => "request_digest_mismatch",
            Self::RequestSignatureInvalid(_) => "request_signature_invalid",
            Self::UnknownClient(_) => "unknown_client",
            Self::TransactionInvalid(_) => "transaction_invalid",
            Self::UnknownSender(_) => "unknown_sender",
            Self::PrePrepareSignatureInvalid => "pre_prepare_signature_invalid",
            Self::PrePrepareDigestMismatch { .. } => "pre_prepare_digest_mismatch",
            Self::ConflictingPrePrepare { .. } => "conflicting_pre_prepare",
            Self::WrongPrimary { .. } => "wrong_primary",
            Self::NotPrimary => "not_primary",
            Self::NoPrimary(_) => "no_primary",
            Self::PrepareWithoutPrePrepare(_) => "prepare_without_pre_prepare",
            Self::UnknownRequest(_) => "unknown_request",
            Self::VoteFromNonValidator(_) => "vote_from_non_validator",
            Self::VoteSignatureInvalid(_) => "vote_signature_invalid",
            Self::RoundExpired(_) => "round_expired",
            Self::InvalidJoin(_) => "invalid_join",
            Self::Signing(_) => "signing_failed",
            Self::Rejected(_) => "rejected",
        }
    }
}
