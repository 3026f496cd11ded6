//! The [`Vault`]: in-memory account index plus optional encrypted file.
//!
//! ## Locking
//!
//! Three layers, always taken in this order:
//!
//! 1. `mutation`: one mutator at a time. Reads never take it.
//! 2. Per-account mutexes, in ascending address order.
//! 3. The index `RwLock`, held only long enough to look up or insert
//!    handles. Nobody waits on an account lock while holding it.
//!
//! A reader clones the account handle out of the index, drops the index
//! lock, then locks the account.
//!
//! ## Commit protocol
//!
//! [`Vault::commit`] validates every staged debit against current
//! balances, builds the post-state of each touched account, writes those
//! records to disk, and only then updates memory. A failure at any step
//! before the last leaves memory untouched.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::account::{passphrase_digest, Account, Inputs};
use super::error::VaultError;
use super::faucet::FaucetPolicy;
use super::file::VaultFile;
use super::stage::{Stage, StageOp};
use crate::config::{COINBASE_SUPPLY, FAUCET_SUPPLY};
use crate::crypto::encryption::VaultKey;
use crate::crypto::hash::Hash32;
use crate::crypto::keys::{Address, KeyPair, PublicKey};
use crate::crypto::mnemonic;
use crate::events::{EventBus, NodeEvent};

type AccountHandle = Arc<Mutex<Account>>;

/// Whether `update_balance` treats a zero amount or missing sender as a
/// silent no-op or as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMode {
    Lenient,
    Strict,
}

/// Returned by [`Vault::create`].
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub master_key: String,
    pub public_key: PublicKey,
    pub mnemonic: String,
    pub address: Address,
}

/// Returned by [`Vault::restore`].
#[derive(Debug, Clone)]
pub struct RestoredAccount {
    pub address: Address,
    pub master_key: String,
    pub public_key: PublicKey,
}

#[derive(Default)]
struct AccountIndex {
    order: Vec<Address>,
    map: HashMap<Address, AccountHandle>,
}

impl AccountIndex {
    fn insert(&mut self, account: Account) {
        let address = account.address;
        if self.map.insert(address, Arc::new(Mutex::new(account))).is_none() {
            self.order.push(address);
        }
    }
}

/// Net effect of a stage on one account.
#[derive(Default)]
struct Effect {
    debit: BigUint,
    credit: BigUint,
    nonce_bumps: u64,
    records: Vec<(Hash32, BigUint)>,
}

/// Encrypted account store.
pub struct Vault {
    index: RwLock<AccountIndex>,
    mutation: Mutex<()>,
    file: Option<Mutex<VaultFile>>,
    owner: Address,
    root_hash: Hash32,
    faucet: Arc<dyn FaucetPolicy>,
    events: EventBus,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("owner", &self.owner)
            .field("accounts", &self.count())
            .field("in_memory", &self.is_in_memory())
            .finish_non_exhaustive()
    }
}

impl Vault {
    fn empty(
        owner: Address,
        file: Option<VaultFile>,
        faucet: Arc<dyn FaucetPolicy>,
        events: EventBus,
    ) -> Self {
        Self {
            index: RwLock::new(AccountIndex::default()),
            mutation: Mutex::new(()),
            file: file.map(Mutex::new),
            owner,
            root_hash: Hash32::digest(owner.as_bytes()),
            faucet,
            events,
        }
    }

    /// A vault that never touches disk, seeded with the node, coinbase, and
    /// faucet accounts.
    pub fn in_memory(owner: &KeyPair, faucet: Arc<dyn FaucetPolicy>, events: EventBus) -> Self {
        let vault = Self::empty(owner.address(), None, faucet, events);
        {
            let mut index = vault.index.write();
            for account in genesis_accounts(owner) {
                index.insert(account);
            }
        }
        vault
    }

    /// Opens the vault file at `path`, creating it if missing or empty.
    ///
    /// The file key is derived from the owner's secret, so only the same
    /// node key reopens it.
    pub fn open(
        owner: &KeyPair,
        path: &Path,
        faucet: Arc<dyn FaucetPolicy>,
        events: EventBus,
    ) -> Result<Self, VaultError> {
        let file = VaultFile::new(path, VaultKey::derive(&owner.secret_bytes()));
        let fresh = file.is_empty();
        let vault = Self::empty(owner.address(), Some(file), faucet, events);

        if fresh {
            vault.init_secure(Account::node(owner))?;
            info!(path = %path.display(), owner = %owner.address(), "vault created");
        } else {
            let loaded = vault.sync_from_file()?;
            if !vault.contains(&owner.address()) {
                warn!(owner = %owner.address(), "node account missing from vault, recreating");
                vault.put(Account::node(owner))?;
            }
            info!(path = %path.display(), loaded, "vault loaded");
        }
        Ok(vault)
    }

    // -----------------------------------------------------------------------
    // File lifecycle
    // -----------------------------------------------------------------------

    /// Writes the root account plus the coinbase and faucet accounts into
    /// a new vault file and indexes them.
    ///
    /// Fails with [`VaultError::VaultAlreadyExists`] if the file has content.
    pub fn init_secure(&self, root: Account) -> Result<(), VaultError> {
        let _mutation = self.mutation.lock();
        let accounts = vec![
            root,
            Account::coinbase(BigUint::from(COINBASE_SUPPLY)),
            Account::faucet(BigUint::from(FAUCET_SUPPLY)),
        ];
        if let Some(file) = &self.file {
            file.lock().init_secure(&accounts)?;
        }
        let mut index = self.index.write();
        for account in accounts {
            index.insert(account);
        }
        Ok(())
    }

    /// Reloads the index from the vault file. Returns how many records
    /// decoded. Unreadable records are logged and skipped.
    pub fn sync_from_file(&self) -> Result<usize, VaultError> {
        let _mutation = self.mutation.lock();
        let Some(file) = &self.file else {
            return Ok(0);
        };

        let report = file.lock().scan()?;
        let loaded = report.accounts.len();
        if report.skipped > 0 {
            warn!(skipped = report.skipped, loaded, "vault records skipped during sync");
        }

        let mut fresh = AccountIndex::default();
        for account in report.accounts {
            if let Some(existing) = fresh.map.get(&account.address).cloned() {
                existing.lock().assign_from(account);
            } else {
                fresh.insert(account);
            }
        }

        let missing: Vec<Account> = [
            Account::coinbase(BigUint::from(COINBASE_SUPPLY)),
            Account::faucet(BigUint::from(FAUCET_SUPPLY)),
        ]
        .into_iter()
        .filter(|a| !fresh.map.contains_key(&a.address))
        .collect();
        for account in missing {
            warn!(address = %account.address, "permanent account missing from file, recreating");
            file.lock().save(&account)?;
            fresh.insert(account);
        }

        *self.index.write() = fresh;
        Ok(loaded)
    }

    /// Appends an encoded account record to the file. Memory is untouched.
    pub fn save(&self, account_bytes: &[u8]) -> Result<(), VaultError> {
        let account = Account::from_bytes(account_bytes)?;
        let _mutation = self.mutation.lock();
        if let Some(file) = &self.file {
            file.lock().save(&account)?;
        }
        Ok(())
    }

    /// Rewrites an encoded account record on disk. Memory is untouched.
    pub fn update(&self, account_bytes: &[u8]) -> Result<(), VaultError> {
        let account = Account::from_bytes(account_bytes)?;
        let _mutation = self.mutation.lock();
        if let Some(file) = &self.file {
            file.lock().update(&account)?;
        }
        Ok(())
    }

    /// Idempotent insert-or-replace of an encoded account, in memory and on
    /// disk. Used for state transfer to joining validators.
    pub fn sync(&self, account_bytes: &[u8]) -> Result<Address, VaultError> {
        let account = Account::from_bytes(account_bytes)?;
        let address = account.address;
        self.put(account)?;
        Ok(address)
    }

    /// Inserts or replaces an account record.
    pub fn put(&self, account: Account) -> Result<(), VaultError> {
        let _mutation = self.mutation.lock();
        self.put_locked(account)
    }

    fn put_locked(&self, account: Account) -> Result<(), VaultError> {
        if let Some(file) = &self.file {
            file.lock().update(&account)?;
        }
        let event = state_event(&account);
        match self.handle(&account.address) {
            Some(handle) => handle.lock().assign_from(account),
            None => self.index.write().insert(account),
        }
        self.events.publish(event);
        Ok(())
    }

    /// Deletes an account. Coinbase and faucet cannot be removed.
    pub fn remove(&self, address: &Address) -> Result<Account, VaultError> {
        if *address == Address::coinbase() || *address == Address::faucet() {
            return Err(VaultError::PermanentAccount(*address));
        }
        let _mutation = self.mutation.lock();
        let handle = self
            .handle(address)
            .ok_or_else(|| VaultError::not_found(address))?;
        let account = handle.lock().clone();
        if account.is_permanent() {
            return Err(VaultError::PermanentAccount(*address));
        }

        if let Some(file) = &self.file {
            file.lock().tombstone(address)?;
        }
        let mut index = self.index.write();
        index.map.remove(address);
        index.order.retain(|a| a != address);
        Ok(account)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    fn handle(&self, address: &Address) -> Option<AccountHandle> {
        self.index.read().map.get(address).cloned()
    }

    fn handles(&self) -> Vec<AccountHandle> {
        let index = self.index.read();
        index
            .order
            .iter()
            .filter_map(|a| index.map.get(a).cloned())
            .collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.read().map.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<Account> {
        self.handle(address).map(|h| h.lock().clone())
    }

    /// Linear scan for the account created with `public_key`.
    pub fn get_by_public_key(&self, public_key: &PublicKey) -> Option<Account> {
        self.handles().into_iter().find_map(|h| {
            let account = h.lock();
            if account.public_key.as_ref() == Some(public_key) {
                Some(account.clone())
            } else {
                None
            }
        })
    }

    /// The `pos`-th account in insertion order.
    pub fn get_pos(&self, pos: usize) -> Option<Account> {
        let handle = {
            let index = self.index.read();
            let address = index.order.get(pos)?;
            index.map.get(address).cloned()
        };
        handle.map(|h| h.lock().clone())
    }

    /// All accounts in insertion order.
    pub fn get_all(&self) -> Vec<Account> {
        self.handles().iter().map(|h| h.lock().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.index.read().order.len()
    }

    pub fn balance(&self, address: &Address) -> Option<BigUint> {
        self.handle(address).map(|h| h.lock().balance.clone())
    }

    /// Sum of every balance in the vault.
    pub fn total_balance(&self) -> BigUint {
        self.handles()
            .iter()
            .fold(BigUint::zero(), |acc, h| acc + &h.lock().balance)
    }

    /// Live handle on an account's credit history.
    pub fn inputs(&self, address: &Address) -> Option<Inputs> {
        self.handle(address).map(|h| h.lock().inputs.share())
    }

    pub fn owner(&self) -> Option<Account> {
        self.get(&self.owner)
    }

    pub fn owner_address(&self) -> Address {
        self.owner
    }

    /// Provenance identifier: BLAKE2b-256 of the owner address.
    pub fn root_hash(&self) -> Hash32 {
        self.root_hash
    }

    pub fn is_in_memory(&self) -> bool {
        self.file.is_none()
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Creates a user account from a fresh 24-word phrase.
    pub fn create(&self, passphrase: &str) -> Result<CreatedAccount, VaultError> {
        let derived = mnemonic::generate(passphrase)?;
        let public_key = derived.keypair.public_key().clone();
        let account = Account::user(public_key.clone(), passphrase);
        let address = account.address;
        self.put(account)?;

        info!(%address, "account created");
        Ok(CreatedAccount {
            master_key: derived.master_key,
            public_key,
            mnemonic: derived.mnemonic,
            address,
        })
    }

    /// Re-derives the key for `phrase` under `passphrase` and looks it up.
    ///
    /// A wrong passphrase derives a different key, so it surfaces as
    /// [`VaultError::AccountNotFound`].
    pub fn restore(&self, phrase: &str, passphrase: &str) -> Result<RestoredAccount, VaultError> {
        let derived = mnemonic::recover(phrase, passphrase)?;
        let public_key = derived.keypair.public_key().clone();
        let account = self
            .get_by_public_key(&public_key)
            .ok_or_else(|| VaultError::not_found(&public_key.address()))?;

        Ok(RestoredAccount {
            address: account.address,
            master_key: derived.master_key,
            public_key,
        })
    }

    /// Checks `passphrase` against the stored digest.
    pub fn verify_account(&self, address: &Address, passphrase: &str) -> Result<Address, VaultError> {
        let account = self
            .get(address)
            .ok_or_else(|| VaultError::not_found(address))?;
        if account.passphrase == passphrase_digest(passphrase) {
            Ok(account.address)
        } else {
            Err(VaultError::WrongCredentials)
        }
    }

    // -----------------------------------------------------------------------
    // Balance mutations
    // -----------------------------------------------------------------------

    /// Moves `amount` from `from` to `to`, creating `to` if needed and
    /// recording the credit under `tx_hash`.
    ///
    /// Returns `Ok(false)` for the lenient no-op cases (zero amount, unknown
    /// sender). A sender that cannot cover the amount is always an error.
    pub fn update_balance(
        &self,
        from: &Address,
        to: &Address,
        amount: &BigUint,
        tx_hash: Hash32,
        mode: BalanceMode,
    ) -> Result<bool, VaultError> {
        let _mutation = self.mutation.lock();

        if amount.is_zero() || !self.contains(from) {
            return match mode {
                BalanceMode::Lenient => Ok(false),
                BalanceMode::Strict => Err(VaultError::InsufficientInputs {
                    address: *from,
                    needed: amount.clone(),
                    available: self.balance(from).unwrap_or_default(),
                }),
            };
        }

        let stage = Stage::new()
            .debit(*from, amount.clone())
            .credit(*to, amount.clone(), Some(tx_hash));
        self.commit_locked(&stage)?;
        Ok(true)
    }

    /// Pays `amount` from the faucet account to `to` if policy allows.
    pub fn drop_faucet(
        &self,
        to: &Address,
        amount: &BigUint,
        tx_hash: Hash32,
    ) -> Result<(), VaultError> {
        let _mutation = self.mutation.lock();

        if amount.is_zero() {
            return Err(VaultError::FaucetLimit("amount must be positive".into()));
        }
        self.faucet.check(to, amount)?;

        let faucet = Address::faucet();
        let available = self.balance(&faucet).unwrap_or_default();
        if &available < amount {
            return Err(VaultError::FaucetInsufficient {
                needed: amount.clone(),
                available,
            });
        }

        let stage = Stage::new()
            .debit(faucet, amount.clone())
            .credit(*to, amount.clone(), Some(tx_hash));
        self.commit_locked(&stage)?;
        self.faucet.record(to);

        debug!(%to, %amount, "faucet drop applied");
        Ok(())
    }

    /// Validates and applies a staged set of debits and credits atomically.
    pub fn commit(&self, stage: &Stage) -> Result<(), VaultError> {
        let _mutation = self.mutation.lock();
        self.commit_locked(stage)
    }

    fn commit_locked(&self, stage: &Stage) -> Result<(), VaultError> {
        if stage.is_empty() {
            return Ok(());
        }

        // Gather handles, then lock accounts in address order.
        let addresses = stage.addresses();
        let handles: Vec<(Address, Option<AccountHandle>)> = {
            let index = self.index.read();
            addresses
                .iter()
                .map(|a| (*a, index.map.get(a).cloned()))
                .collect()
        };
        let mut guards: BTreeMap<Address, MutexGuard<'_, Account>> = BTreeMap::new();
        for (address, handle) in &handles {
            if let Some(handle) = handle {
                guards.insert(*address, handle.lock());
            }
        }

        // Net effect per account.
        let mut effects: BTreeMap<Address, Effect> = BTreeMap::new();
        for op in stage.ops() {
            let effect = effects.entry(*op.address()).or_default();
            match op {
                StageOp::Debit {
                    amount, bump_nonce, ..
                } => {
                    effect.debit += amount;
                    if *bump_nonce {
                        effect.nonce_bumps += 1;
                    }
                }
                StageOp::Credit {
                    amount, tx_hash, ..
                } => {
                    effect.credit += amount;
                    if let Some(hash) = tx_hash {
                        effect.records.push((*hash, amount.clone()));
                    }
                }
            }
        }

        // Validate debits against current balances.
        for (address, effect) in &effects {
            if effect.debit.is_zero() && effect.nonce_bumps == 0 {
                continue;
            }
            let account = guards
                .get(address)
                .ok_or_else(|| VaultError::not_found(address))?;
            if account.balance < effect.debit {
                return Err(VaultError::InsufficientInputs {
                    address: *address,
                    needed: effect.debit.clone(),
                    available: account.balance.clone(),
                });
            }
        }

        // Build post-state records.
        let mut snapshots: Vec<Account> = Vec::with_capacity(effects.len());
        for (address, effect) in &effects {
            let mut snapshot = match guards.get(address) {
                Some(account) => (**account).clone(),
                None => Account::shadow(*address),
            };
            snapshot.balance = &snapshot.balance + &effect.credit - &effect.debit;
            snapshot.nonce = snapshot.nonce.saturating_add(effect.nonce_bumps);
            for (hash, amount) in &effect.records {
                snapshot.inputs.record(*hash, amount.clone());
            }
            snapshots.push(snapshot);
        }

        // Persist before touching memory.
        if let Some(file) = &self.file {
            let mut file = file.lock();
            for snapshot in &snapshots {
                file.update(snapshot)?;
            }
        }

        // Apply.
        let mut created = Vec::new();
        for snapshot in &snapshots {
            match guards.get_mut(&snapshot.address) {
                Some(account) => {
                    account.balance = snapshot.balance.clone();
                    account.nonce = snapshot.nonce;
                    if let Some(effect) = effects.get(&snapshot.address) {
                        for (hash, amount) in &effect.records {
                            account.inputs.record(*hash, amount.clone());
                        }
                    }
                }
                None => created.push(snapshot.clone()),
            }
        }
        if !created.is_empty() {
            let mut index = self.index.write();
            for account in created {
                debug!(address = %account.address, "shadow account created");
                index.insert(account);
            }
        }
        drop(guards);

        for snapshot in &snapshots {
            self.events.publish(state_event(snapshot));
        }
        Ok(())
    }
}

fn genesis_accounts(owner: &KeyPair) -> Vec<Account> {
    vec![
        Account::node(owner),
        Account::coinbase(BigUint::from(COINBASE_SUPPLY)),
        Account::faucet(BigUint::from(FAUCET_SUPPLY)),
    ]
}

fn state_event(account: &Account) -> NodeEvent {
    NodeEvent::AccountStateChanged {
        address: account.address,
        balance: account.balance.to_str_radix(10),
        nonce: account.nonce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::faucet::CooldownFaucetPolicy;
    use std::time::Duration;

    fn policy() -> Arc<dyn FaucetPolicy> {
        Arc::new(CooldownFaucetPolicy::new(1u64, 1_000u64, Duration::from_secs(3600)))
    }

    fn memory_vault() -> Vault {
        Vault::in_memory(&KeyPair::generate(), policy(), EventBus::new())
    }

    fn funded(vault: &Vault, amount: u64) -> Address {
        let addr = KeyPair::generate().address();
        vault
            .update_balance(
                &Address::coinbase(),
                &addr,
                &BigUint::from(amount),
                Hash32::digest(addr.as_bytes()),
                BalanceMode::Strict,
            )
            .unwrap();
        addr
    }

    #[test]
    fn genesis_accounts_exist() {
        let vault = memory_vault();
        assert_eq!(vault.count(), 3);
        assert!(vault.owner().is_some());
        assert_eq!(
            vault.balance(&Address::coinbase()),
            Some(BigUint::from(COINBASE_SUPPLY))
        );
        assert_eq!(vault.root_hash(), Hash32::digest(vault.owner_address().as_bytes()));
    }

    #[test]
    fn update_balance_creates_shadow_and_records_input() {
        let vault = memory_vault();
        let total = vault.total_balance();
        let a = funded(&vault, 100);
        let b = KeyPair::generate().address();
        let h = Hash32::digest(b"t1");

        assert!(vault
            .update_balance(&a, &b, &BigUint::from(10u32), h, BalanceMode::Strict)
            .unwrap());
        assert_eq!(vault.balance(&a), Some(BigUint::from(90u32)));
        assert_eq!(vault.balance(&b), Some(BigUint::from(10u32)));
        assert_eq!(vault.inputs(&b).unwrap().get(&h), Some(BigUint::from(10u32)));
        assert_eq!(vault.total_balance(), total);
    }

    #[test]
    fn lenient_and_strict_no_op_cases() {
        let vault = memory_vault();
        let ghost = KeyPair::generate().address();
        let b = KeyPair::generate().address();
        let h = Hash32::digest(b"t");

        assert!(!vault
            .update_balance(&ghost, &b, &BigUint::from(1u32), h, BalanceMode::Lenient)
            .unwrap());
        assert!(!vault.contains(&b));
        assert!(matches!(
            vault.update_balance(&ghost, &b, &BigUint::from(1u32), h, BalanceMode::Strict),
            Err(VaultError::InsufficientInputs { .. })
        ));
        assert!(!vault
            .update_balance(&Address::coinbase(), &b, &BigUint::zero(), h, BalanceMode::Lenient)
            .unwrap());
    }

    #[test]
    fn overdraft_fails_without_mutation() {
        let vault = memory_vault();
        let a = funded(&vault, 5);
        let b = KeyPair::generate().address();
        let err = vault
            .update_balance(&a, &b, &BigUint::from(6u32), Hash32::digest(b"x"), BalanceMode::Lenient)
            .unwrap_err();
        assert!(matches!(err, VaultError::InsufficientInputs { .. }));
        assert_eq!(vault.balance(&a), Some(BigUint::from(5u32)));
        assert!(!vault.contains(&b), "no shadow account on failure");
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let vault = memory_vault();
        let a = funded(&vault, 10);
        let b = funded(&vault, 1);
        let c = KeyPair::generate().address();

        let stage = Stage::new()
            .debit(a, BigUint::from(5u32))
            .debit(b, BigUint::from(5u32))
            .credit(c, BigUint::from(10u32), None);
        assert!(vault.commit(&stage).is_err());
        assert_eq!(vault.balance(&a), Some(BigUint::from(10u32)));
        assert!(!vault.contains(&c));
    }

    #[test]
    fn commit_bumps_nonce() {
        let vault = memory_vault();
        let a = funded(&vault, 10);
        let stage = Stage::new().debit_with_nonce(a, BigUint::from(1u32));
        vault.commit(&stage).unwrap();
        assert_eq!(vault.get(&a).unwrap().nonce, 1);
    }

    #[test]
    fn faucet_drop_and_cooldown() {
        let vault = memory_vault();
        let b = KeyPair::generate().address();
        vault
            .drop_faucet(&b, &BigUint::from(100u32), Hash32::digest(b"h1"))
            .unwrap();
        assert!(matches!(
            vault.drop_faucet(&b, &BigUint::from(100u32), Hash32::digest(b"h2")),
            Err(VaultError::FaucetLimit(_))
        ));
        assert_eq!(vault.balance(&b), Some(BigUint::from(100u32)));
    }

    #[test]
    fn faucet_insufficient_does_not_start_cooldown() {
        let owner = KeyPair::generate();
        let policy: Arc<dyn FaucetPolicy> = Arc::new(CooldownFaucetPolicy::new(
            1u64,
            u64::MAX,
            Duration::from_secs(3600),
        ));
        let vault = Vault::in_memory(&owner, policy, EventBus::new());
        let b = KeyPair::generate().address();
        let too_much = BigUint::from(FAUCET_SUPPLY) + 1u32;
        assert!(matches!(
            vault.drop_faucet(&b, &too_much, Hash32::digest(b"h")),
            Err(VaultError::FaucetInsufficient { .. })
        ));
        vault
            .drop_faucet(&b, &BigUint::from(1u32), Hash32::digest(b"h"))
            .unwrap();
    }

    #[test]
    fn permanent_accounts_cannot_be_removed() {
        let vault = memory_vault();
        assert!(matches!(
            vault.remove(&Address::coinbase()),
            Err(VaultError::PermanentAccount(_))
        ));
        assert!(matches!(
            vault.remove(&Address::faucet()),
            Err(VaultError::PermanentAccount(_))
        ));
        let a = funded(&vault, 1);
        vault.remove(&a).unwrap();
        assert!(!vault.contains(&a));
    }

    #[test]
    fn create_restore_verify() {
        let vault = memory_vault();
        let created = vault.create("p").unwrap();
        assert_eq!(created.mnemonic.split(' ').count(), 24);

        let restored = vault.restore(&created.mnemonic, "p").unwrap();
        assert_eq!(restored.address, created.address);
        assert_eq!(restored.public_key, created.public_key);

        assert!(matches!(
            vault.restore(&created.mnemonic, "q"),
            Err(VaultError::AccountNotFound(_))
        ));
        assert_eq!(vault.verify_account(&created.address, "p").unwrap(), created.address);
        assert!(matches!(
            vault.verify_account(&created.address, "q"),
            Err(VaultError::WrongCredentials)
        ));
    }

    #[test]
    fn get_pos_follows_insertion_order() {
        let vault = memory_vault();
        let a = funded(&vault, 1);
        assert_eq!(vault.get_pos(0).unwrap().address, vault.owner_address());
        assert_eq!(vault.get_pos(3).unwrap().address, a);
        assert!(vault.get_pos(4).is_none());
        assert_eq!(vault.get_all().len(), 4);
    }

    #[test]
    fn sync_replaces_existing_record() {
        let vault = memory_vault();
        let a = funded(&vault, 7);
        let inputs = vault.inputs(&a).unwrap();

        let mut replacement = vault.get(&a).unwrap();
        replacement.balance = BigUint::from(70u32);
        vault.sync(&replacement.to_bytes().unwrap()).unwrap();

        assert_eq!(vault.balance(&a), Some(BigUint::from(70u32)));
        assert_eq!(vault.count(), 4);
        assert_eq!(inputs.len(), 1, "live inputs handle survives replace");
    }

    #[tokio::test]
    async fn mutations_publish_state_events() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let vault = Vault::in_memory(&KeyPair::generate(), policy(), events);
        let b = KeyPair::generate().address();
        vault
            .drop_faucet(&b, &BigUint::from(3u32), Hash32::digest(b"e"))
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert!(seen.iter().any(|ev| matches!(
            ev,
            NodeEvent::AccountStateChanged { address, .. } if *address == b
        )));
    }

    #[test]
    fn persistent_vault_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.dat");
        let owner = KeyPair::generate();

        let b = KeyPair::generate().address();
        {
            let vault = Vault::open(&owner, &path, policy(), EventBus::new()).unwrap();
            vault
                .drop_faucet(&b, &BigUint::from(42u32), Hash32::digest(b"p"))
                .unwrap();
        }

        let reopened = Vault::open(&owner, &path, policy(), EventBus::new()).unwrap();
        assert_eq!(reopened.count(), 4);
        assert_eq!(reopened.balance(&b), Some(BigUint::from(42u32)));
        assert_eq!(
            reopened.balance(&Address::faucet()),
            Some(BigUint::from(FAUCET_SUPPLY - 42))
        );
    }

    #[test]
    fn init_secure_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.dat");
        let owner = KeyPair::generate();
        let vault = Vault::open(&owner, &path, policy(), EventBus::new()).unwrap();
        assert!(matches!(
            vault.init_secure(Account::node(&owner)),
            Err(VaultError::VaultAlreadyExists(_))
        ));
    }
}
