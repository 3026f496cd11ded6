//! # Consensus Driver
//!
//! One driver per validator. It owns the inbox of raw frames, decodes each
//! one, and runs the handler for its tag. All outgoing traffic goes through
//! an [`Outbound`] handle, so the driver never touches a socket.
//!
//! ## Handlers
//!
//! | Frame        | Who acts  | Effect                                               |
//! |--------------|-----------|------------------------------------------------------|
//! | `Join`       | primary   | admit validator, start state transfer                |
//! | `Sync`       | everyone  | store the account, `ReplySync` if addressed to us    |
//! | `ReplySync`  | primary   | send the next account or `SyncDone`                  |
//! | `Request`    | primary   | open a round, broadcast `PrePrepare`                 |
//! | `PrePrepare` | backups   | accept the request, broadcast `Prepare`              |
//! | `Prepare`    | everyone  | on 2f+1, broadcast `Commit`                          |
//! | `Commit`     | everyone  | on 2f+1, execute, append a block, `Reply` the client |
//! | `OP_TX`      | everyone  | admit to the mempool                                 |
//! | `OP_ACC`     | everyone  | store the account                                    |
//!
//! The primary's `PrePrepare` also counts as its prepare vote, so a round
//! with `n = 3f + 1` validators finalizes with `f` of them silent.
//!
//! ## Timing
//!
//! The loop wakes on every inbound frame and on a fixed tick. The tick
//! expires rounds past their deadline, prunes finished rounds, and, on a
//! mining primary, proposes whatever the mempool holds. A frame for a round
//! past its deadline expires that round on arrival, so a late quorum never
//! finalizes between ticks.
//!
//! ## Transactions
//!
//! The primary and every backup check the carried transaction before a round
//! goes anywhere: a transfer must verify against its sender's key, faucet and
//! coinbase transactions must be well formed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::metrics::ConsensusMetrics;
use super::round::{RoundKey, RoundRegistry, RoundStage, RoundState};
use super::validator_set::{ValidatorInfo, ValidatorSet};
use super::ConsensusError;
use crate::config::{DEFAULT_VIEW, DRIVER_TICK, ROUND_RETENTION_FACTOR, ROUND_TIMEOUT};
use crate::crypto::keys::{Address, KeyPair, PublicKey};
use crate::events::{EventBus, NodeEvent};
use crate::execution::{ExecutionPool, Outcome};
use crate::network::mempool::{Mempool, TxSource};
use crate::network::message::{
    unix_now, ClientRequest, JoinMsg, Message, PrePrepareMsg, ReplyMsg, ReplySyncMsg, RequestMsg,
    Signed, SyncDoneMsg, SyncMsg, VoteMsg, REPLY_SYNC_TYPE,
};
use crate::network::transport::Outbound;
use crate::storage::{Block, Chain};
use crate::transaction::{verify_structure, verify_transaction, Transaction, TxKind};
use crate::vault::{Account, AccountStatus, Vault};

/// `result` of a reply whose transaction was applied or was a no-op.
pub const REPLY_RESULT_DONE: &str = "DONE";

/// Prefix of the `result` of a reply whose transaction was rejected.
pub const REPLY_RESULT_REJECTED: &str = "REJECTED";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Deadline of every round, counted from its creation.
    pub round_timeout: Duration,
    /// Interval of the housekeeping tick.
    pub tick: Duration,
    /// Propose mempool transactions when this node is primary.
    pub miner: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            round_timeout: ROUND_TIMEOUT,
            tick: DRIVER_TICK,
            miner: false,
        }
    }
}

/// Everything the driver works on. Built by the node owner.
pub struct DriverDeps {
    pub keypair: Arc<KeyPair>,
    /// Where this node accepts frames, `host:port`.
    pub network_addr: String,
    /// Initial validators, usually from the peers file.
    pub validators: ValidatorSet,
    pub vault: Arc<Vault>,
    pub chain: Arc<dyn Chain>,
    pub mempool: Arc<Mempool>,
    pub pool: Arc<ExecutionPool>,
    pub outbound: Arc<dyn Outbound>,
    pub events: EventBus,
    pub metrics: ConsensusMetrics,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Prepare,
    Commit,
}

// ---------------------------------------------------------------------------
// ConsensusDriver
// ---------------------------------------------------------------------------

pub struct ConsensusDriver {
    keypair: Arc<KeyPair>,
    address: Address,
    network_addr: String,
    validators: RwLock<ValidatorSet>,
    rounds: RoundRegistry,
    vault: Arc<Vault>,
    chain: Arc<dyn Chain>,
    mempool: Arc<Mempool>,
    pool: Arc<ExecutionPool>,
    outbound: Arc<dyn Outbound>,
    events: EventBus,
    metrics: ConsensusMetrics,
    config: DriverConfig,
    sequence: AtomicU64,
    sync_sequence: AtomicU64,
    /// Joiner address to the number of accounts still to send it.
    sync_queue: Mutex<HashMap<Address, usize>>,
    awaiting_sync: AtomicBool,
}

impl std::fmt::Debug for ConsensusDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusDriver")
            .field("address", &self.address)
            .field("validators", &self.validators.read().size())
            .field("rounds", &self.rounds.len())
            .finish_non_exhaustive()
    }
}

impl ConsensusDriver {
    /// Builds a driver. This node is added to the validator set if the
    /// peers file did not list it.
    pub fn new(deps: DriverDeps, config: DriverConfig) -> Self {
        let address = deps.keypair.address();
        let mut validators = deps.validators;
        validators.add(ValidatorInfo::new(
            deps.keypair.public_key().clone(),
            deps.network_addr.clone(),
        ));

        Self {
            keypair: deps.keypair,
            address,
            network_addr: deps.network_addr,
            validators: RwLock::new(validators),
            rounds: RoundRegistry::new(),
            vault: deps.vault,
            chain: deps.chain,
            mempool: deps.mempool,
            pool: deps.pool,
            outbound: deps.outbound,
            events: deps.events,
            metrics: deps.metrics,
            config,
            sequence: AtomicU64::new(0),
            sync_sequence: AtomicU64::new(0),
            sync_queue: Mutex::new(HashMap::new()),
            awaiting_sync: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn validators(&self) -> ValidatorSet {
        self.validators.read().clone()
    }

    pub fn rounds(&self) -> &RoundRegistry {
        &self.rounds
    }

    pub fn metrics(&self) -> &ConsensusMetrics {
        &self.metrics
    }

    /// The primary of the live validator set.
    pub fn primary(&self) -> Option<ValidatorInfo> {
        self.validators.read().primary(DEFAULT_VIEW).cloned()
    }

    pub fn is_primary(&self) -> bool {
        self.primary().is_some_and(|p| p.address == self.address)
    }

    /// Sequence number the next proposed round will use.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// True between sending a `Join` and receiving `SyncDone`.
    pub fn is_syncing(&self) -> bool {
        self.awaiting_sync.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Processes frames and ticks until `shutdown` flips to `true` or the
    /// inbox closes. Unfinished rounds are expired on the way out.
    pub async fn run(&self, mut inbox: mpsc::Receiver<Vec<u8>>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            address = %self.address,
            validators = self.validators.read().size(),
            primary = self.is_primary(),
            miner = self.config.miner,
            "consensus driver started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                frame = inbox.recv() => match frame {
                    Some(bytes) => self.handle_frame(&bytes).await,
                    None => break,
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }

        for round in self.rounds.expire_all() {
            self.record_expiry(round.key());
            debug!(round = %round.key(), "round expired at shutdown");
        }
        info!(address = %self.address, "consensus driver stopped");
    }

    /// Decodes and handles one frame. Drops are logged and counted.
    pub async fn handle_frame(&self, bytes: &[u8]) {
        let result = match Message::decode(bytes) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            self.metrics.dropped(e.reason());
            warn!(reason = e.reason(), error = %e, "consensus message dropped");
        }
    }

    pub async fn handle_message(&self, msg: Message) -> Result<(), ConsensusError> {
        debug!(tag = %msg.tag(), "handling message");
        match msg {
            Message::Join(signed) => self.on_join(signed),
            Message::Sync(sync) => self.on_sync(sync),
            Message::ReplySync(reply) => self.on_reply_sync(reply),
            Message::SyncDone(done) => {
                self.on_sync_done(done);
                Ok(())
            }
            Message::Request(signed) => self.on_request(signed).await,
            Message::PrePrepare(signed) => self.on_pre_prepare(signed).await,
            Message::Prepare(signed) => self.on_vote(signed, Phase::Prepare).await,
            Message::Commit(signed) => self.on_vote(signed, Phase::Commit).await,
            Message::Reply(reply) => {
                info!(from = %reply.node_id, result = %reply.result, "reply received");
                Ok(())
            }
            Message::OpTx(tx) => self.on_op_tx(tx),
            Message::OpAcc(account) => self.put_account(account),
        }
    }

    /// Housekeeping: expire, prune, and propose when mining.
    pub async fn on_tick(&self) {
        let now = Instant::now();
        for round in self.rounds.sweep_expired(now) {
            let key = round.key();
            self.record_expiry(key);
            warn!(height = key.height, view = key.view, seq = key.seq, "round expired without reply");
        }

        let pruned = self
            .rounds
            .prune(now, self.config.round_timeout * ROUND_RETENTION_FACTOR);
        if pruned > 0 {
            debug!(pruned, "finished rounds pruned");
        }
        self.metrics.live_rounds.set(self.rounds.len() as i64);

        if self.config.miner {
            self.propose_pending().await;
        }
    }

    // -----------------------------------------------------------------------
    // Membership and state transfer
    // -----------------------------------------------------------------------

    /// Asks the primary to admit this node and starts waiting for state.
    pub fn request_join(&self) -> Result<(), ConsensusError> {
        let primary = self
            .primary()
            .ok_or_else(|| ConsensusError::NoPrimary("live set".into()))?;
        if primary.address == self.address {
            return Err(ConsensusError::Rejected("this node is the primary".into()));
        }

        let join = JoinMsg {
            address: self.address,
            public_key: self.keypair.public_key().clone(),
            account: self.own_account()?,
            timestamp: unix_now(),
            network_addr: self.network_addr.clone(),
        };
        let frame = Message::Join(self.sign(join)?).encode()?;
        self.awaiting_sync.store(true, Ordering::SeqCst);
        if let Err(e) = self.outbound.unicast(&primary.address, &frame) {
            warn!(primary = %primary.address, error = %e, "join unicast failed, broadcasting");
            self.outbound.broadcast(&frame);
        }
        info!(primary = %primary.address, "join sent");
        Ok(())
    }

    fn on_join(&self, signed: Signed<JoinMsg>) -> Result<(), ConsensusError> {
        self.require_primary()?;
        let join = &signed.msg;
        if !join.is_self_certifying()
            || join.account.address != join.address
            || !signed.verify(&join.public_key)
        {
            return Err(ConsensusError::InvalidJoin(join.address));
        }

        let admitted = self.validators.write().add(ValidatorInfo::new(
            join.public_key.clone(),
            join.network_addr.clone(),
        ));
        self.outbound.connect(join.address, &join.network_addr);
        self.put_account(join.account.clone())?;

        let pending = self.vault.count();
        self.sync_queue.lock().insert(join.address, pending);
        self.send_sync(join.address, self.own_account()?)?;

        if admitted {
            self.events.publish(NodeEvent::PeerJoined {
                address: join.address,
            });
        }
        info!(joiner = %join.address, network = %join.network_addr, pending, admitted, "validator joined");
        Ok(())
    }

    fn on_sync(&self, sync: SyncMsg) -> Result<(), ConsensusError> {
        self.put_account(sync.payload)?;
        if sync.target == self.address {
            let reply = ReplySyncMsg {
                timestamp: unix_now(),
                client_id: self.address,
                kind: REPLY_SYNC_TYPE,
                payload: self.own_account()?,
            };
            self.send_broadcast(Message::ReplySync(reply))?;
            debug!(seq = sync.seq, "sync applied, replied");
        }
        Ok(())
    }

    fn on_reply_sync(&self, reply: ReplySyncMsg) -> Result<(), ConsensusError> {
        self.require_primary()?;
        if reply.kind != REPLY_SYNC_TYPE {
            return Err(ConsensusError::Rejected(format!(
                "unexpected reply-sync type {}",
                reply.kind
            )));
        }
        let joiner = reply.client_id;
        self.put_account(reply.payload)?;

        let remaining = {
            let mut queue = self.sync_queue.lock();
            let pending = queue.get_mut(&joiner).ok_or_else(|| {
                ConsensusError::Rejected(format!("no state transfer in progress for {joiner}"))
            })?;
            *pending = pending.saturating_sub(1);
            let remaining = *pending;
            if remaining == 0 {
                queue.remove(&joiner);
            }
            remaining
        };

        match self.vault.get_pos(remaining).filter(|_| remaining > 0) {
            Some(account) => self.send_sync(joiner, shareable(account)),
            None => {
                self.sync_queue.lock().remove(&joiner);
                self.send_broadcast(Message::SyncDone(SyncDoneMsg::done()))?;
                self.events.publish(NodeEvent::SyncDone { target: joiner });
                info!(%joiner, "state transfer complete");
                Ok(())
            }
        }
    }

    fn on_sync_done(&self, done: SyncDoneMsg) {
        if self.awaiting_sync.swap(false, Ordering::SeqCst) {
            info!(result = %done.result, accounts = self.vault.count(), "state sync finished");
            self.events.publish(NodeEvent::SyncDone {
                target: self.address,
            });
        } else {
            debug!("sync-done for another node");
        }
    }

    fn send_sync(&self, target: Address, payload: Account) -> Result<(), ConsensusError> {
        let sync = SyncMsg {
            seq: self.sync_sequence.fetch_add(1, Ordering::SeqCst),
            target,
            payload,
            timestamp: unix_now(),
        };
        debug!(%target, seq = sync.seq, account = %sync.payload.address, "sending sync");
        self.send_broadcast(Message::Sync(sync))
    }

    // -----------------------------------------------------------------------
    // Three-phase agreement
    // -----------------------------------------------------------------------

    /// Wraps `tx` in a request signed by this node and proposes it.
    pub async fn propose(&self, tx: Transaction) -> Result<(), ConsensusError> {
        let body = ClientRequest::for_transaction(&tx)
            .map_err(|e| ConsensusError::Rejected(e.to_string()))?;
        let request = RequestMsg::new(tx.kind.to_string(), self.address, body);
        let signed = self.sign(request)?;
        self.on_request(signed).await
    }

    async fn propose_pending(&self) {
        if !self.is_primary() || self.chain.is_idle() {
            return;
        }
        while let Some(tx) = self.mempool.next() {
            let hash = tx.hash;
            if let Err(e) = self.propose(tx).await {
                self.metrics.dropped(e.reason());
                warn!(%hash, error = %e, "mempool transaction not proposed");
            }
        }
    }

    async fn on_request(&self, signed: Signed<RequestMsg>) -> Result<(), ConsensusError> {
        let snapshot = Arc::new(self.validators.read().clone());
        let primary = snapshot
            .primary(DEFAULT_VIEW)
            .map(|p| p.address)
            .ok_or_else(|| ConsensusError::NoPrimary("next round".into()))?;
        if primary != self.address {
            return Err(ConsensusError::NotPrimary);
        }

        let request = signed.msg.clone();
        if !request.request.digest_matches() {
            return Err(ConsensusError::RequestDigestMismatch);
        }
        let client_key = self
            .public_key_of(&request.client_id)
            .ok_or(ConsensusError::UnknownClient(request.client_id))?;
        if !signed.verify(&client_key) {
            return Err(ConsensusError::RequestSignatureInvalid(request.client_id));
        }
        self.check_transaction(&request)?;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let height = self.chain.latest_block().height() + 1;
        let key = RoundKey::new(height, DEFAULT_VIEW, seq);
        let (round, _) = self
            .rounds
            .get_or_create(key, || snapshot, self.config.round_timeout);
        self.metrics.rounds_started_total.inc();

        let digest = request.request.digest.clone();
        round.stash_request(&digest, request.clone());
        round.record_pre_prepare(&digest, self.address);
        round.record_prepare(&digest, self.address);
        round.advance(RoundStage::PrePrepare);

        let pre_prepare = PrePrepareMsg {
            request,
            digest: digest.clone(),
            view_id: key.view,
            sequence_id: key.seq,
            block_height: key.height,
        };
        self.send_broadcast(Message::PrePrepare(self.sign(pre_prepare)?))?;
        info!(height, seq, %digest, client = %signed.msg.client_id, "pre-prepare broadcast");

        self.progress(&round, &digest).await
    }

    async fn on_pre_prepare(&self, signed: Signed<PrePrepareMsg>) -> Result<(), ConsensusError> {
        let pp = &signed.msg;
        let key = RoundKey::new(pp.block_height, pp.view_id, pp.sequence_id);
        let (round, created) = self.rounds.get_or_create(
            key,
            || Arc::new(self.validators.read().clone()),
            self.config.round_timeout,
        );
        if created {
            self.metrics.rounds_started_total.inc();
        }
        self.check_open(&round)?;

        let Some(primary) = round.validators().primary(pp.view_id).cloned() else {
            if round.advance(RoundStage::Expired) {
                self.record_expiry(key);
            }
            return Err(ConsensusError::NoPrimary(key.to_string()));
        };
        if primary.address == self.address {
            return Err(ConsensusError::WrongPrimary { view: pp.view_id });
        }
        if !signed.verify(&primary.public_key) {
            let by_other = round
                .validators()
                .iter()
                .any(|v| v.address != primary.address && signed.verify(&v.public_key));
            return Err(if by_other {
                ConsensusError::WrongPrimary { view: pp.view_id }
            } else {
                ConsensusError::PrePrepareSignatureInvalid
            });
        }
        if pp.digest != pp.request.request.digest {
            return Err(ConsensusError::PrePrepareDigestMismatch {
                expected: pp.request.request.digest.clone(),
                got: pp.digest.clone(),
            });
        }
        if !pp.request.request.digest_matches() {
            return Err(ConsensusError::RequestDigestMismatch);
        }
        self.check_transaction(&pp.request)?;
        match round.pre_prepared_by(&primary.address) {
            Some(existing) if existing == pp.digest => {
                debug!(round = %key, "duplicate pre-prepare ignored");
                return Ok(());
            }
            Some(existing) => {
                return Err(ConsensusError::ConflictingPrePrepare {
                    round: key.to_string(),
                    existing,
                })
            }
            None => {}
        }

        let digest = pp.digest.clone();
        round.stash_request(&digest, pp.request.clone());
        round.record_pre_prepare(&digest, primary.address);
        round.record_prepare(&digest, primary.address);
        round.advance(RoundStage::PrePrepare);

        if round.validators().contains(&self.address) {
            self.send_broadcast(Message::Prepare(self.sign(self.vote(key, &digest))?))?;
            round.record_prepare(&digest, self.address);
            round.advance(RoundStage::Prepare);
        }
        debug!(round = %key, %digest, primary = %primary.address, "pre-prepare accepted");

        self.progress(&round, &digest).await
    }

    async fn on_vote(&self, signed: Signed<VoteMsg>, phase: Phase) -> Result<(), ConsensusError> {
        let vote = &signed.msg;
        let key = RoundKey::new(vote.block_height, vote.view_id, vote.sequence_id);
        let round = self
            .rounds
            .get(&key)
            .ok_or_else(|| ConsensusError::UnknownRequest(vote.digest.clone()))?;
        self.check_open(&round)?;

        let voter_key = round
            .validators()
            .public_key(&vote.node_id)
            .cloned()
            .ok_or(ConsensusError::VoteFromNonValidator(vote.node_id))?;
        if !signed.verify(&voter_key) {
            return Err(ConsensusError::VoteSignatureInvalid(vote.node_id));
        }
        if !round.has_request(&vote.digest) {
            return Err(ConsensusError::UnknownRequest(vote.digest.clone()));
        }
        let primary = round
            .validators()
            .primary(vote.view_id)
            .map(|p| p.address)
            .ok_or_else(|| ConsensusError::NoPrimary(key.to_string()))?;
        if !round.has_pre_prepare_from(&vote.digest, &primary) {
            return Err(ConsensusError::PrepareWithoutPrePrepare(key.to_string()));
        }

        let fresh = match phase {
            Phase::Prepare => round.record_prepare(&vote.digest, vote.node_id),
            Phase::Commit => round.record_commit(&vote.digest, vote.node_id),
        };
        if !fresh {
            debug!(round = %key, voter = %vote.node_id, ?phase, "duplicate vote ignored");
            return Ok(());
        }
        debug!(
            round = %key,
            voter = %vote.node_id,
            ?phase,
            prepares = round.prepare_count(&vote.digest),
            commits = round.commit_count(&vote.digest),
            "vote recorded"
        );

        self.progress(&round, &vote.digest).await
    }

    /// Emits our commit on prepare quorum and finalizes on commit quorum.
    async fn progress(&self, round: &Arc<RoundState>, digest: &str) -> Result<(), ConsensusError> {
        let key = round.key();
        if round.validators().contains(&self.address)
            && round.has_prepare_quorum(digest)
            && !round.has_committed(digest, &self.address)
        {
            let signed = self.sign(self.vote(key, digest))?;
            round.record_commit(digest, self.address);
            self.send_broadcast(Message::Commit(signed))?;
            round.advance(RoundStage::Commit);
            debug!(round = %key, %digest, "commit broadcast");
        }

        if round.has_commit_quorum(digest) {
            self.check_open(round)?;
            if round.mark_reply_sent(digest) {
                self.finalize(round, digest).await;
            }
        }
        Ok(())
    }

    async fn finalize(&self, round: &Arc<RoundState>, digest: &str) {
        let key = round.key();
        round.advance(RoundStage::Finalized);
        let Some(request) = round.request(digest) else {
            warn!(round = %key, %digest, "commit quorum without request");
            return;
        };
        let proposer = round
            .validators()
            .primary(key.view)
            .map(|p| p.address)
            .unwrap_or(self.address);

        let result = match request.request.transaction() {
            Ok(tx) => {
                let timestamp = u64::try_from(request.timestamp).unwrap_or(0) * 1_000;
                self.execute(tx, proposer, timestamp).await
            }
            Err(e) => {
                warn!(round = %key, error = %e, "request does not carry a transaction");
                format!("{REPLY_RESULT_REJECTED}: malformed transaction: {e}")
            }
        };

        self.send_reply(ReplyMsg {
            view_id: key.view,
            timestamp: unix_now(),
            client_id: request.client_id,
            node_id: self.address,
            result,
        });

        self.metrics.rounds_finalized_total.inc();
        self.events.publish(NodeEvent::RoundFinalized {
            height: key.height,
            view: key.view,
            seq: key.seq,
            digest: digest.to_string(),
        });
        info!(height = key.height, view = key.view, seq = key.seq, %digest, "round finalized");
    }

    async fn execute(&self, tx: Transaction, proposer: Address, timestamp: u64) -> String {
        let hash = tx.hash;
        self.mempool.remove(&hash);
        match self.pool.execute(tx.clone()).await {
            Ok(Outcome::Applied) => {
                let block = Block::with_timestamp(&self.chain.latest_block(), vec![tx], proposer, timestamp);
                let height = block.height();
                match self.chain.append(block) {
                    Ok(()) => debug!(height, %hash, "block appended"),
                    Err(e) => warn!(height, %hash, error = %e, "block not appended"),
                }
                REPLY_RESULT_DONE.to_string()
            }
            Ok(Outcome::NoOp) => REPLY_RESULT_DONE.to_string(),
            Err(e) => {
                warn!(%hash, error = %e, "finalized transaction rejected");
                format!("{REPLY_RESULT_REJECTED}: {e}")
            }
        }
    }

    fn send_reply(&self, reply: ReplyMsg) {
        let client = reply.client_id;
        if client == self.address {
            debug!(result = %reply.result, "own request finalized");
            return;
        }
        let frame = match Message::Reply(reply).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%client, error = %e, "reply not encodable");
                return;
            }
        };
        match self.outbound.unicast(&client, &frame) {
            Ok(()) => self.metrics.replies_sent_total.inc(),
            Err(e) => warn!(%client, error = %e, "reply not delivered"),
        }
    }

    // -----------------------------------------------------------------------
    // Mempool and account frames
    // -----------------------------------------------------------------------

    fn on_op_tx(&self, tx: Transaction) -> Result<(), ConsensusError> {
        let key = self.public_key_of(&tx.from);
        let hash = self
            .mempool
            .add(tx, key.as_ref())
            .map_err(|e| ConsensusError::Rejected(e.to_string()))?;
        debug!(%hash, "transaction received from peer");
        Ok(())
    }

    /// Stores a peer-supplied account. Our own record is never replaced.
    fn put_account(&self, account: Account) -> Result<(), ConsensusError> {
        if account.address == self.address {
            debug!("ignoring remote copy of own account");
            return Ok(());
        }
        let address = account.address;
        self.vault
            .put(account)
            .map_err(|e| ConsensusError::Rejected(e.to_string()))?;
        debug!(%address, "account synced");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Refuses work on an expired round. A round past its deadline is
    /// expired here even if the tick has not swept it yet.
    fn check_open(&self, round: &RoundState) -> Result<(), ConsensusError> {
        if round.is_expired() && round.advance(RoundStage::Expired) {
            self.record_expiry(round.key());
            warn!(round = %round.key(), "round expired before its quorum");
        }
        if round.stage() == RoundStage::Expired {
            Err(ConsensusError::RoundExpired(round.key().to_string()))
        } else {
            Ok(())
        }
    }

    fn record_expiry(&self, key: RoundKey) {
        self.metrics.rounds_expired_total.inc();
        self.events.publish(NodeEvent::RoundExpired {
            height: key.height,
            view: key.view,
            seq: key.seq,
        });
    }

    fn require_primary(&self) -> Result<(), ConsensusError> {
        if self.is_primary() {
            Ok(())
        } else {
            Err(ConsensusError::NotPrimary)
        }
    }

    /// The carried transaction must be well formed, and a transfer must be
    /// signed by the account it spends from.
    fn check_transaction(&self, request: &RequestMsg) -> Result<(), ConsensusError> {
        let tx = request
            .request
            .transaction()
            .map_err(|e| ConsensusError::Rejected(format!("malformed transaction: {e}")))?;
        match tx.kind {
            TxKind::Transfer => {
                let key = self
                    .public_key_of(&tx.from)
                    .ok_or(ConsensusError::UnknownSender(tx.from))?;
                verify_transaction(&tx, &key)?;
            }
            TxKind::Faucet | TxKind::Coinbase => verify_structure(&tx)?,
        }
        Ok(())
    }

    /// Validators first, then vault accounts.
    fn public_key_of(&self, address: &Address) -> Option<PublicKey> {
        if let Some(key) = self.validators.read().public_key(address) {
            return Some(key.clone());
        }
        self.vault.get(address).and_then(|a| a.public_key)
    }

    fn own_account(&self) -> Result<Account, ConsensusError> {
        self.vault
            .owner()
            .map(shareable)
            .ok_or_else(|| ConsensusError::Rejected("own account missing from vault".into()))
    }

    fn vote(&self, key: RoundKey, digest: &str) -> VoteMsg {
        VoteMsg {
            digest: digest.to_string(),
            view_id: key.view,
            sequence_id: key.seq,
            node_id: self.address,
            block_height: key.height,
        }
    }

    fn sign<T: serde::Serialize>(&self, msg: T) -> Result<Signed<T>, ConsensusError> {
        Signed::new(msg, &self.keypair).map_err(|e| ConsensusError::Signing(e.to_string()))
    }

    fn send_broadcast(&self, msg: Message) -> Result<(), ConsensusError> {
        let frame = msg.encode()?;
        self.outbound.broadcast(&frame);
        Ok(())
    }
}

/// Strips key material from a node account before it leaves this process.
fn shareable(mut account: Account) -> Account {
    if account.status == AccountStatus::Node {
        account.code_hash.clear();
    }
    account
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionEngine;
    use crate::network::transport::{MemoryEndpoint, MemoryNetwork};
    use crate::storage::MemoryChain;
    use crate::transaction::{sign_transaction, TransactionBuilder, TxError};
    use crate::vault::CooldownFaucetPolicy;
    use num_bigint::BigUint;

    struct TestNode {
        driver: Arc<ConsensusDriver>,
        inbox: mpsc::Receiver<Vec<u8>>,
        vault: Arc<Vault>,
        chain: Arc<MemoryChain>,
    }

    fn policy() -> Arc<CooldownFaucetPolicy> {
        Arc::new(CooldownFaucetPolicy::new(1u64, 1_000u64, Duration::from_secs(3600)))
    }

    fn node(net: &MemoryNetwork, keypair: KeyPair, validators: ValidatorSet, miner: bool) -> TestNode {
        let keypair = Arc::new(keypair);
        let events = EventBus::new();
        let vault = Arc::new(Vault::in_memory(&keypair, policy(), events.clone()));
        let chain = Arc::new(MemoryChain::new());
        let engine = Arc::new(ExecutionEngine::new(Arc::clone(&vault), events.clone(), 0));
        let (endpoint, inbox): (MemoryEndpoint, _) = net.endpoint(keypair.address(), 64);
        let driver = ConsensusDriver::new(
            DriverDeps {
                keypair,
                network_addr: String::new(),
                validators,
                vault: Arc::clone(&vault),
                chain: chain.clone(),
                mempool: Arc::new(Mempool::default()),
                pool: Arc::new(ExecutionPool::spawn(engine, 2)),
                outbound: Arc::new(endpoint),
                events,
                metrics: ConsensusMetrics::unregistered().unwrap(),
            },
            DriverConfig {
                miner,
                ..DriverConfig::default()
            },
        );
        TestNode {
            driver: Arc::new(driver),
            inbox,
            vault,
            chain,
        }
    }

    /// Delivers queued frames until every inbox is empty.
    async fn pump(nodes: &mut [TestNode]) {
        loop {
            let mut delivered = false;
            for n in nodes.iter_mut() {
                while let Ok(frame) = n.inbox.try_recv() {
                    n.driver.handle_frame(&frame).await;
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }

    fn signed_request(client: &KeyPair, tx: &Transaction) -> Signed<RequestMsg> {
        let body = ClientRequest::for_transaction(tx).unwrap();
        Signed::new(RequestMsg::new("transfer", client.address(), body), client).unwrap()
    }

    fn faucet_tx(to: Address) -> Transaction {
        TransactionBuilder::faucet(to).value(25u64).build().unwrap()
    }

    fn transfer_tx(from: Address, to: Address, value: u64) -> Transaction {
        TransactionBuilder::transfer(from, to)
            .value(value)
            .nonce(1)
            .build()
            .unwrap()
    }

    fn fund(vault: &Vault, owner: &KeyPair, balance: u64) {
        let mut account = Account::user(owner.public_key().clone(), "client");
        account.balance = BigUint::from(balance);
        vault.put(account).unwrap();
    }

    fn four_validators() -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let set = ValidatorSet::from_validators(
            keys.iter()
                .map(|k| ValidatorInfo::new(k.public_key().clone(), "")),
        );
        (keys, set)
    }

    /// Handles the next queued frame on each of `nodes`.
    async fn deliver_one(nodes: &mut [TestNode]) {
        for n in nodes.iter_mut() {
            let frame = n.inbox.try_recv().unwrap();
            n.driver.handle_frame(&frame).await;
        }
    }

    #[tokio::test]
    async fn single_validator_finalizes_alone() {
        let net = MemoryNetwork::new();
        let kp = KeyPair::generate();
        let mut nodes = vec![node(&net, kp.clone(), ValidatorSet::new(), false)];
        let n = &nodes[0];
        assert!(n.driver.is_primary());

        let target = Address([4; 32]);
        n.driver
            .handle_message(Message::Request(signed_request(&kp, &faucet_tx(target))))
            .await
            .unwrap();
        pump(&mut nodes).await;

        let n = &nodes[0];
        assert_eq!(n.vault.balance(&target), Some(BigUint::from(25u32)));
        assert_eq!(n.chain.latest_block().height(), 1);
        assert_eq!(n.driver.metrics().rounds_finalized_total.get(), 1);
        let key = n.driver.rounds().keys()[0];
        assert_eq!(n.driver.rounds().get(&key).unwrap().stage(), RoundStage::Finalized);
    }

    #[tokio::test]
    async fn request_from_unknown_or_forged_client_is_dropped() {
        let net = MemoryNetwork::new();
        let kp = KeyPair::generate();
        let n = node(&net, kp.clone(), ValidatorSet::new(), false);

        let stranger = KeyPair::generate();
        let err = n
            .driver
            .handle_message(Message::Request(signed_request(&stranger, &faucet_tx(Address([1; 32])))))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::UnknownClient(_)));

        let mut forged = signed_request(&kp, &faucet_tx(Address([1; 32])));
        forged.msg.timestamp += 1;
        let err = n.driver.handle_message(Message::Request(forged)).await.unwrap_err();
        assert!(matches!(err, ConsensusError::RequestSignatureInvalid(_)));

        let mut tampered = signed_request(&kp, &faucet_tx(Address([1; 32])));
        tampered.msg.request.digest = "00".repeat(32);
        let err = n.driver.handle_message(Message::Request(tampered)).await.unwrap_err();
        assert!(matches!(err, ConsensusError::RequestDigestMismatch));
        assert!(n.driver.rounds().is_empty());
    }

    #[tokio::test]
    async fn backup_rejects_requests_and_foreign_pre_prepares() {
        let net = MemoryNetwork::new();
        let primary = KeyPair::generate();
        let backup = KeyPair::generate();
        let set = ValidatorSet::from_validators([
            ValidatorInfo::new(primary.public_key().clone(), ""),
            ValidatorInfo::new(backup.public_key().clone(), ""),
        ]);
        let b = node(&net, backup.clone(), set, false);
        assert!(!b.driver.is_primary());

        let req = signed_request(&backup, &faucet_tx(Address([1; 32])));
        let err = b.driver.handle_message(Message::Request(req.clone())).await.unwrap_err();
        assert!(matches!(err, ConsensusError::NotPrimary));

        let pp = PrePrepareMsg {
            request: req.msg.clone(),
            digest: req.msg.request.digest.clone(),
            view_id: 0,
            sequence_id: 0,
            block_height: 1,
        };
        let by_backup = Signed::new(pp.clone(), &backup).unwrap();
        let err = b.driver.handle_message(Message::PrePrepare(by_backup)).await.unwrap_err();
        assert!(matches!(err, ConsensusError::WrongPrimary { .. }));

        let by_stranger = Signed::new(pp, &KeyPair::generate()).unwrap();
        let err = b.driver.handle_message(Message::PrePrepare(by_stranger)).await.unwrap_err();
        assert!(matches!(err, ConsensusError::PrePrepareSignatureInvalid));
    }

    #[tokio::test]
    async fn prepare_without_round_is_unknown_request() {
        let net = MemoryNetwork::new();
        let kp = KeyPair::generate();
        let n = node(&net, kp.clone(), ValidatorSet::new(), false);
        let vote = Signed::new(
            VoteMsg {
                digest: "ab".into(),
                view_id: 0,
                sequence_id: 9,
                node_id: kp.address(),
                block_height: 1,
            },
            &kp,
        )
        .unwrap();
        n.driver.handle_frame(&Message::Prepare(vote).encode().unwrap()).await;
        assert_eq!(n.driver.metrics().dropped_count("unknown_request"), 1);
    }

    #[tokio::test]
    async fn join_transfers_state_and_finishes() {
        let net = MemoryNetwork::new();
        let primary_kp = KeyPair::generate();
        let joiner_kp = KeyPair::generate();
        let primary_info = ValidatorInfo::new(primary_kp.public_key().clone(), "");

        let mut nodes = vec![
            node(&net, primary_kp.clone(), ValidatorSet::new(), false),
            node(
                &net,
                joiner_kp.clone(),
                ValidatorSet::from_validators([primary_info]),
                false,
            ),
        ];
        let funded = Address([8; 32]);
        nodes[0]
            .vault
            .put(Account::shadow(funded))
            .unwrap();

        let mut events = nodes[0].driver.events.subscribe();
        nodes[1].driver.request_join().unwrap();
        assert!(nodes[1].driver.is_syncing());
        pump(&mut nodes).await;

        assert!(!nodes[1].driver.is_syncing());
        assert!(nodes[0].driver.validators().contains(&joiner_kp.address()));
        assert!(nodes[1].vault.contains(&funded));
        assert!(nodes[1].vault.contains(&primary_kp.address()));
        assert!(nodes[0].vault.contains(&joiner_kp.address()));

        let synced_primary = nodes[1].vault.get(&primary_kp.address()).unwrap();
        assert!(synced_primary.code_hash.is_empty());

        let mut saw_join = false;
        while let Ok(ev) = events.try_recv() {
            if ev == (NodeEvent::PeerJoined { address: joiner_kp.address() }) {
                saw_join = true;
            }
        }
        assert!(saw_join);
    }

    #[tokio::test]
    async fn miner_proposes_mempool_transactions() {
        let net = MemoryNetwork::new();
        let kp = KeyPair::generate();
        let mut nodes = vec![node(&net, kp, ValidatorSet::new(), true)];
        let target = Address([6; 32]);
        nodes[0].driver.mempool.add(faucet_tx(target), None).unwrap();

        nodes[0].driver.on_tick().await;
        pump(&mut nodes).await;

        assert!(nodes[0].driver.mempool.is_empty());
        assert_eq!(nodes[0].vault.balance(&target), Some(BigUint::from(25u32)));
        assert_eq!(nodes[0].driver.next_sequence(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_expires_stale_rounds() {
        let net = MemoryNetwork::new();
        let primary = KeyPair::generate();
        let set = ValidatorSet::from_validators(
            std::iter::once(ValidatorInfo::new(primary.public_key().clone(), ""))
                .chain((0..3).map(|_| ValidatorInfo::new(KeyPair::generate().public_key().clone(), ""))),
        );
        let n = node(&net, primary.clone(), set, false);
        n.driver
            .handle_message(Message::Request(signed_request(&primary, &faucet_tx(Address([2; 32])))))
            .await
            .unwrap();

        tokio::time::advance(ROUND_TIMEOUT + Duration::from_millis(1)).await;
        n.driver.on_tick().await;

        let key = n.driver.rounds().keys()[0];
        assert_eq!(n.driver.rounds().get(&key).unwrap().stage(), RoundStage::Expired);
        assert_eq!(n.driver.metrics().rounds_expired_total.get(), 1);
        assert_eq!(n.driver.metrics().rounds_finalized_total.get(), 0);
    }

    #[tokio::test]
    async fn transfer_must_be_signed_by_its_sender() {
        let net = MemoryNetwork::new();
        let kp = KeyPair::generate();
        let mut nodes = vec![node(&net, kp, ValidatorSet::new(), false)];
        let victim = KeyPair::generate();
        let thief = KeyPair::generate();
        fund(&nodes[0].vault, &victim, 100);
        fund(&nodes[0].vault, &thief, 0);

        let unsigned = transfer_tx(victim.address(), thief.address(), 100);
        let err = nodes[0]
            .driver
            .handle_message(Message::Request(signed_request(&thief, &unsigned)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::TransactionInvalid(TxError::MissingSignature)));

        let mut forged = transfer_tx(victim.address(), thief.address(), 100);
        sign_transaction(&mut forged, &thief).unwrap();
        let frame = Message::Request(signed_request(&thief, &forged)).encode().unwrap();
        nodes[0].driver.handle_frame(&frame).await;
        assert_eq!(nodes[0].driver.metrics().dropped_count("transaction_invalid"), 1);

        let mut orphan = transfer_tx(Address([3; 32]), thief.address(), 1);
        sign_transaction(&mut orphan, &thief).unwrap();
        let err = nodes[0]
            .driver
            .handle_message(Message::Request(signed_request(&thief, &orphan)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::UnknownSender(_)));

        assert!(nodes[0].driver.rounds().is_empty());
        assert_eq!(nodes[0].driver.next_sequence(), 0);
        assert_eq!(nodes[0].vault.balance(&victim.address()), Some(BigUint::from(100u32)));

        let mut honest = transfer_tx(victim.address(), thief.address(), 40);
        sign_transaction(&mut honest, &victim).unwrap();
        nodes[0]
            .driver
            .handle_message(Message::Request(signed_request(&thief, &honest)))
            .await
            .unwrap();
        pump(&mut nodes).await;
        assert_eq!(nodes[0].vault.balance(&victim.address()), Some(BigUint::from(60u32)));
        assert_eq!(nodes[0].vault.balance(&thief.address()), Some(BigUint::from(40u32)));
    }

    #[tokio::test]
    async fn backup_checks_the_transaction_itself() {
        let net = MemoryNetwork::new();
        let primary = KeyPair::generate();
        let backup = KeyPair::generate();
        let set = ValidatorSet::from_validators([
            ValidatorInfo::new(primary.public_key().clone(), ""),
            ValidatorInfo::new(backup.public_key().clone(), ""),
        ]);
        let (_primary_endpoint, mut primary_inbox) = net.endpoint(primary.address(), 8);
        let b = node(&net, backup, set, false);
        let victim = KeyPair::generate();
        fund(&b.vault, &victim, 100);

        let req = signed_request(&primary, &transfer_tx(victim.address(), primary.address(), 100));
        let pp = PrePrepareMsg {
            request: req.msg.clone(),
            digest: req.msg.request.digest.clone(),
            view_id: 0,
            sequence_id: 0,
            block_height: 1,
        };
        let err = b
            .driver
            .handle_message(Message::PrePrepare(Signed::new(pp, &primary).unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::TransactionInvalid(TxError::MissingSignature)));

        let round = b.driver.rounds().get(&RoundKey::new(1, 0, 0)).unwrap();
        assert!(!round.has_request(&req.msg.request.digest));
        assert!(primary_inbox.try_recv().is_err());
        assert_eq!(b.vault.balance(&victim.address()), Some(BigUint::from(100u32)));
    }

    #[tokio::test(start_paused = true)]
    async fn votes_after_the_deadline_do_not_finalize() {
        let net = MemoryNetwork::new();
        let (keys, set) = four_validators();
        let mut nodes: Vec<TestNode> = keys
            .iter()
            .map(|k| node(&net, k.clone(), set.clone(), false))
            .collect();
        let target = Address([5; 32]);
        nodes[0]
            .driver
            .handle_message(Message::Request(signed_request(&keys[0], &faucet_tx(target))))
            .await
            .unwrap();
        deliver_one(&mut nodes[1..]).await;

        let key = nodes[0].driver.rounds().keys()[0];
        assert!(!nodes[0].driver.rounds().get(&key).unwrap().stage().is_terminal());

        tokio::time::advance(ROUND_TIMEOUT + Duration::from_millis(1)).await;
        pump(&mut nodes).await;

        for n in &nodes {
            let round = n.driver.rounds().get(&key).unwrap();
            assert_eq!(round.stage(), RoundStage::Expired);
            assert_eq!(n.driver.metrics().rounds_finalized_total.get(), 0);
            assert_eq!(n.driver.metrics().rounds_expired_total.get(), 1);
            assert!(n.driver.metrics().dropped_count("round_expired") >= 1);
            assert_eq!(n.vault.balance(&target), None);
            assert_eq!(n.chain.latest_block().height(), 0);
        }
    }

    #[tokio::test]
    async fn duplicate_prepare_frame_counts_once() {
        let net = MemoryNetwork::new();
        let (keys, set) = four_validators();
        let mut nodes: Vec<TestNode> = keys
            .iter()
            .map(|k| node(&net, k.clone(), set.clone(), false))
            .collect();
        let request = signed_request(&keys[0], &faucet_tx(Address([7; 32])));
        let digest = request.msg.request.digest.clone();
        nodes[0]
            .driver
            .handle_message(Message::Request(request))
            .await
            .unwrap();

        // V2 accepts the pre-prepare; its prepare queues behind the
        // pre-prepare in V3's inbox.
        deliver_one(&mut nodes[1..2]).await;
        deliver_one(&mut nodes[2..3]).await;
        let key = nodes[0].driver.rounds().keys()[0];
        let v3_round = nodes[2].driver.rounds().get(&key).unwrap();
        assert_eq!(v3_round.prepare_count(&digest), 2);

        let frame = nodes[2].inbox.try_recv().unwrap();
        match Message::decode(&frame).unwrap() {
            Message::Prepare(vote) => assert_eq!(vote.msg.node_id, keys[1].address()),
            other => panic!("expected V2's prepare, got {}", other.tag()),
        }
        nodes[2].driver.handle_frame(&frame).await;
        nodes[2].driver.handle_frame(&frame).await;

        // Primary, V3 itself and V2 once.
        assert_eq!(v3_round.prepare_count(&digest), 3);
        assert!(v3_round.has_committed(&digest, &keys[2].address()));
        assert_eq!(nodes[2].driver.metrics().dropped_count("unknown_request"), 0);

        let mut v3_commits = 0;
        while let Ok(frame) = nodes[3].inbox.try_recv() {
            if let Ok(Message::Commit(vote)) = Message::decode(&frame) {
                if vote.msg.node_id == keys[2].address() {
                    v3_commits += 1;
                }
            }
        }
        assert_eq!(v3_commits, 1);
    }

    #[tokio::test]
    async fn pre_prepare_for_round_without_primary_expires_it() {
        let net = MemoryNetwork::new();
        let (keys, set) = four_validators();
        let backup = node(&net, keys[1].clone(), set, false);
        let mut events = backup.driver.events.subscribe();

        let key = RoundKey::new(1, 0, 0);
        backup
            .driver
            .rounds()
            .get_or_create(key, || Arc::new(ValidatorSet::new()), ROUND_TIMEOUT);

        let req = signed_request(&keys[0], &faucet_tx(Address([9; 32])));
        let pp = PrePrepareMsg {
            request: req.msg.clone(),
            digest: req.msg.request.digest.clone(),
            view_id: 0,
            sequence_id: 0,
            block_height: 1,
        };
        let frame = Message::PrePrepare(Signed::new(pp, &keys[0]).unwrap())
            .encode()
            .unwrap();
        backup.driver.handle_frame(&frame).await;

        assert_eq!(backup.driver.rounds().get(&key).unwrap().stage(), RoundStage::Expired);
        assert_eq!(backup.driver.metrics().dropped_count("no_primary"), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            NodeEvent::RoundExpired {
                height: 1,
                view: 0,
                seq: 0
            }
        );

        backup.driver.handle_frame(&frame).await;
        assert_eq!(backup.driver.metrics().dropped_count("round_expired"), 1);
    }

    #[tokio::test]
    async fn shutdown_expires_open_rounds_and_announces_them() {
        let net = MemoryNetwork::new();
        let (keys, set) = four_validators();
        let TestNode { driver, inbox, .. } = node(&net, keys[0].clone(), set, false);
        let mut events = driver.events.subscribe();
        driver
            .handle_message(Message::Request(signed_request(&keys[0], &faucet_tx(Address([2; 32])))))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let running = Arc::clone(&driver);
        let task = tokio::spawn(async move { running.run(inbox, stop_rx).await });
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let key = driver.rounds().keys()[0];
        assert_eq!(driver.rounds().get(&key).unwrap().stage(), RoundStage::Expired);
        assert_eq!(driver.metrics().rounds_expired_total.get(), 1);
        let mut announced = false;
        while let Ok(ev) = events.try_recv() {
            if ev == (NodeEvent::RoundExpired { height: key.height, view: key.view, seq: key.seq }) {
                announced = true;
            }
        }
        assert!(announced);
    }
}
