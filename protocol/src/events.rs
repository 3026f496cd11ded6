//! # Observer Events
//!
//! A push channel of things that happened inside the node. Observers (the
//! WebSocket endpoint, tests, log shippers) subscribe to an [`EventBus`]
//! and receive every [`NodeEvent`] published after they subscribed.
//!
//! Publishing never blocks and never fails: with no subscribers the event
//! is simply dropped, and a slow subscriber sees `Lagged` instead of
//! holding up the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::crypto::hash::Hash32;
use crate::crypto::keys::Address;
use crate::transaction::TxKind;

/// Events pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A transaction was applied to the vault.
    TransactionApplied {
        hash: Hash32,
        kind: TxKind,
        from: Address,
        to: Option<Address>,
        value: String,
    },
    /// An account record changed in memory and, if persistent, on disk.
    AccountStateChanged {
        address: Address,
        balance: String,
        nonce: u64,
    },
    /// A round reached its commit quorum and replied.
    RoundFinalized {
        height: u64,
        view: u64,
        seq: u64,
        digest: String,
    },
    /// A round passed its deadline without replying.
    RoundExpired { height: u64, view: u64, seq: u64 },
    /// A validator was admitted through `Join`.
    PeerJoined { address: Address },
    /// State transfer to a joiner finished.
    SyncDone { target: Address },
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: NodeEvent) {
        // Err only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Underlying sender, for callers that want to hand it to axum state.
    pub fn sender(&self) -> broadcast::Sender<NodeEvent> {
        self.tx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
