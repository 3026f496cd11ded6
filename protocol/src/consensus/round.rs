//! Per-round vote logs.
//!
//! A round is one `(height, view, seq)` tuple. It owns its validator
//! snapshot, three vote logs, the reply-sent flags and the request pool,
//! all behind a single mutex. Rounds never share state with each other.
//!
//! Logs only grow. The first vote for a `(digest, voter)` pair is kept and
//! every later one is ignored, which makes the counts monotonic and the
//! quorum checks stable once they hold.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use super::validator_set::ValidatorSet;
use crate::crypto::keys::Address;
use crate::network::message::RequestMsg;

/// Identity of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundKey {
    pub height: u64,
    pub view: u64,
    pub seq: u64,
}

impl RoundKey {
    pub fn new(height: u64, view: u64, seq: u64) -> Self {
        Self { height, view, seq }
    }
}

impl fmt::Display for RoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}/v{}/s{}", self.height, self.view, self.seq)
    }
}

/// Where a round is in the three-phase protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStage {
    Idle,
    PrePrepare,
    Prepare,
    Commit,
    Finalized,
    Expired,
}

impl RoundStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Expired)
    }
}

#[derive(Debug, Default)]
struct Logs {
    pre_prepare: HashMap<String, HashSet<Address>>,
    prepare: HashMap<String, HashSet<Address>>,
    commit: HashMap<String, HashSet<Address>>,
    reply_sent: HashMap<String, bool>,
    requests: HashMap<String, RequestMsg>,
}

fn record(log: &mut HashMap<String, HashSet<Address>>, digest: &str, voter: Address) -> bool {
    log.entry(digest.to_string()).or_default().insert(voter)
}

fn count(log: &HashMap<String, HashSet<Address>>, digest: &str) -> usize {
    log.get(digest).map_or(0, HashSet::len)
}

/// State of a single round.
#[derive(Debug)]
pub struct RoundState {
    key: RoundKey,
    validators: Arc<ValidatorSet>,
    quorum: usize,
    started: Instant,
    deadline: Instant,
    stage: Mutex<RoundStage>,
    logs: Mutex<Logs>,
}

impl RoundState {
    pub fn new(key: RoundKey, validators: Arc<ValidatorSet>, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            key,
            quorum: validators.quorum(),
            validators,
            started,
            deadline: started + timeout,
            stage: Mutex::new(RoundStage::Idle),
            logs: Mutex::new(Logs::default()),
        }
    }

    pub fn key(&self) -> RoundKey {
        self.key
    }

    pub fn validators(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    // -----------------------------------------------------------------------
    // Votes
    // -----------------------------------------------------------------------

    /// True only the first time `(digest, voter)` is recorded.
    pub fn record_pre_prepare(&self, digest: &str, voter: Address) -> bool {
        record(&mut self.logs.lock().pre_prepare, digest, voter)
    }

    pub fn record_prepare(&self, digest: &str, voter: Address) -> bool {
        record(&mut self.logs.lock().prepare, digest, voter)
    }

    pub fn record_commit(&self, digest: &str, voter: Address) -> bool {
        record(&mut self.logs.lock().commit, digest, voter)
    }

    pub fn has_pre_prepare_from(&self, digest: &str, voter: &Address) -> bool {
        self.logs
            .lock()
            .pre_prepare
            .get(digest)
            .is_some_and(|v| v.contains(voter))
    }

    /// The digest `voter` pre-prepared in this round, if any.
    pub fn pre_prepared_by(&self, voter: &Address) -> Option<String> {
        self.logs
            .lock()
            .pre_prepare
            .iter()
            .find(|(_, voters)| voters.contains(voter))
            .map(|(digest, _)| digest.clone())
    }

    pub fn has_committed(&self, digest: &str, voter: &Address) -> bool {
        self.logs
            .lock()
            .commit
            .get(digest)
            .is_some_and(|v| v.contains(voter))
    }

    pub fn prepare_count(&self, digest: &str) -> usize {
        count(&self.logs.lock().prepare, digest)
    }

    pub fn commit_count(&self, digest: &str) -> usize {
        count(&self.logs.lock().commit, digest)
    }

    pub fn has_prepare_quorum(&self, digest: &str) -> bool {
        self.prepare_count(digest) >= self.quorum
    }

    pub fn has_commit_quorum(&self, digest: &str) -> bool {
        self.commit_count(digest) >= self.quorum
    }

    // -----------------------------------------------------------------------
    // Replies and requests
    // -----------------------------------------------------------------------

    /// Atomically sets the reply flag. True only for the caller that set it.
    pub fn mark_reply_sent(&self, digest: &str) -> bool {
        let mut logs = self.logs.lock();
        let sent = logs.reply_sent.entry(digest.to_string()).or_insert(false);
        if *sent {
            false
        } else {
            *sent = true;
            true
        }
    }

    pub fn reply_sent(&self, digest: &str) -> bool {
        self.logs.lock().reply_sent.get(digest).copied().unwrap_or(false)
    }

    /// Stores a request under its digest. The first stored copy wins.
    pub fn stash_request(&self, digest: &str, request: RequestMsg) {
        self.logs
            .lock()
            .requests
            .entry(digest.to_string())
            .or_insert(request);
    }

    pub fn request(&self, digest: &str) -> Option<RequestMsg> {
        self.logs.lock().requests.get(digest).cloned()
    }

    pub fn has_request(&self, digest: &str) -> bool {
        self.logs.lock().requests.contains_key(digest)
    }

    // -----------------------------------------------------------------------
    // Stage and deadline
    // -----------------------------------------------------------------------

    pub fn stage(&self) -> RoundStage {
        *self.stage.lock()
    }

    /// Moves to `next` unless the round is already terminal.
    pub fn advance(&self, next: RoundStage) -> bool {
        let mut stage = self.stage.lock();
        if stage.is_terminal() {
            return false;
        }
        *stage = next;
        true
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

// ---------------------------------------------------------------------------
// RoundRegistry
// ---------------------------------------------------------------------------

/// All live rounds, keyed by `(height, view, seq)`.
#[derive(Debug, Default)]
pub struct RoundRegistry {
    rounds: RwLock<BTreeMap<RoundKey, Arc<RoundState>>>,
}

impl RoundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RoundKey) -> Option<Arc<RoundState>> {
        self.rounds.read().get(key).cloned()
    }

    /// Returns the round for `key`, creating it with `snapshot` if absent.
    /// The boolean is true when the round was created by this call.
    pub fn get_or_create(
        &self,
        key: RoundKey,
        snapshot: impl FnOnce() -> Arc<ValidatorSet>,
        timeout: Duration,
    ) -> (Arc<RoundState>, bool) {
        if let Some(round) = self.get(&key) {
            return (round, false);
        }
        let mut rounds = self.rounds.write();
        if let Some(round) = rounds.get(&key) {
            return (Arc::clone(round), false);
        }
        let round = Arc::new(RoundState::new(key, snapshot(), timeout));
        rounds.insert(key, Arc::clone(&round));
        (round, true)
    }

    /// Moves every non-terminal round past its deadline to `Expired` and
    /// returns them.
    pub fn sweep_expired(&self, now: Instant) -> Vec<Arc<RoundState>> {
        self.rounds
            .read()
            .values()
            .filter(|r| r.is_expired_at(now) && r.advance(RoundStage::Expired))
            .cloned()
            .collect()
    }

    /// Expires every round that has not finished. Used on shutdown.
    pub fn expire_all(&self) -> Vec<Arc<RoundState>> {
        self.rounds
            .read()
            .values()
            .filter(|r| r.advance(RoundStage::Expired))
            .cloned()
            .collect()
    }

    /// Drops terminal rounds whose deadline is older than `retention`.
    pub fn prune(&self, now: Instant, retention: Duration) -> usize {
        let mut rounds = self.rounds.write();
        let before = rounds.len();
        rounds.retain(|_, r| !(r.stage().is_terminal() && now > r.deadline() + retention));
        before - rounds.len()
    }

    pub fn len(&self) -> usize {
        self.rounds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.read().is_empty()
    }

    pub fn keys(&self) -> Vec<RoundKey> {
        self.rounds.read().keys().copied().collect()
    }
}
