//! # RPC Dispatcher
//!
//! [`Rpc::execute`] maps a method name plus positional parameters to a
//! typed [`RpcResult`]. The HTTP endpoint in the node binary wraps it in a
//! JSON-RPC 2.0 envelope; tests call it directly.
//!
//! Failures never escape as `Err`: a bad parameter or a vault error comes
//! back as [`RpcResult::Error`] with a human-readable message, and an
//! unknown method as [`RpcResult::MethodNotSupported`].
//!
//! ## Method Index
//!
//! | Method                       | Params                       | Result              |
//! |------------------------------|------------------------------|---------------------|
//! | `account.getAll`             | none                         | `Accounts`          |
//! | `account.getCount`           | none                         | `Count`             |
//! | `account.create`             | `[name?, passphrase]`        | `Created`           |
//! | `account.restore`            | `[mnemonic, passphrase]`     | `Restored`          |
//! | `account.verify`             | `[address, passphrase]`      | `Address`           |
//! | `account.getBalance`         | `[address]`                  | `Balance`           |
//! | `account.faucet`             | `[address, amount]`          | `Hash` (queued tx)  |
//! | `account.inputs`             | `[address]`                  | `Inputs`            |
//! | `chain.getMinimumGasValue`   | none                         | `GasPrice`          |
//! | `cerera.getInfo`             | none                         | `Info`              |
//! | `cerera.getBlockCount`       | none                         | `Count`             |
//! | `cerera.getBlockHash`        | `[height]`                   | `Hash`              |
//! | `cerera.getBlock`            | `[hash]`                     | `Block`             |
//! | `cerera.getMemPool`          | none                         | `MemPool`           |
//! | `cerera.sendTransaction`     | `[signed transaction]`       | `Hash`              |
//! | `cerera.signTransaction`     | any                          | `MethodNotSupported`|
//! | `cerera.getVersion`          | none                         | `Version`           |
//! | `cerera.consensus.join`      | `[address]`                  | `Text`              |
//! | `cerera.consensus.sync`      | none                         | `Blocks`            |
//! | `cerera.consensus.done`      | none                         | `Text`              |
//! | `cerera.consensus.ready`     | none                         | `Hash`              |

use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::mempool::{Mempool, MempoolError};
use super::message::Message;
use super::transport::Outbound;
use crate::config::{CHAIN_ID, NETWORK_NAME, PROTOCOL_VERSION};
use crate::consensus::ConsensusDriver;
use crate::crypto::hash::Hash32;
use crate::crypto::keys::{Address, PublicKey};
use crate::storage::{Block, Chain};
use crate::transaction::types::parse_amount;
use crate::transaction::{Transaction, TransactionBuilder, TxError};
use crate::vault::{Account, AccountStatus, Vault, VaultError};

/// `cerera.consensus.join` answer when the caller is not a validator.
pub const JOIN_DONE: &str = "DONE";

/// `cerera.consensus.done` answer.
pub const CONSENSUS_DONE: &str = "DONE";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Internal failure of a handler. Rendered into [`RpcResult::Error`].
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error("encoding failed: {0}")]
    Encoding(String),
}

// ---------------------------------------------------------------------------
// Result payloads
// ---------------------------------------------------------------------------

/// An account as RPC callers see it. Key material is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub address: Address,
    pub balance: String,
    pub nonce: u64,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
    pub inputs: usize,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address,
            balance: account.balance.to_str_radix(10),
            nonce: account.nonce,
            status: account.status,
            public_key: account.public_key.clone(),
            inputs: account.inputs.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedView {
    pub address: Address,
    #[serde(rename = "pub")]
    pub public_key: PublicKey,
    pub mnemonic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredView {
    pub address: Address,
    #[serde(rename = "pub")]
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub address: Address,
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub network: String,
    pub version: String,
    pub height: u64,
    pub latest_hash: Hash32,
    pub blocks: u64,
    pub validators: usize,
    pub primary: Option<Address>,
    pub accounts: usize,
    pub idle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemPoolInfo {
    pub size: usize,
    pub hashes: Vec<Hash32>,
}

/// Typed result of every RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RpcResult {
    Accounts(Vec<AccountView>),
    Count(u64),
    Created(CreatedView),
    Restored(RestoredView),
    Address(Address),
    Balance(BalanceView),
    Inputs(BTreeMap<Hash32, String>),
    GasPrice(u64),
    Info(ChainInfo),
    Hash(Hash32),
    Block(Box<Block>),
    Blocks(Vec<Block>),
    MemPool(MemPoolInfo),
    Version(String),
    Text(String),
    MethodNotSupported { method: String },
    Error { message: String },
}

impl RpcResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::MethodNotSupported { .. })
    }
}

/// Normalizes JSON-RPC `params` into a positional list.
pub fn positional(params: Value) -> Vec<Value> {
    match params {
        Value::Null => Vec::new(),
        Value::Array(values) => values,
        other => vec![other],
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

struct Params<'a>(&'a [Value]);

impl<'a> Params<'a> {
    fn value(&self, i: usize) -> Result<&'a Value, RpcError> {
        self.0
            .get(i)
            .ok_or_else(|| RpcError::InvalidParams(format!("missing parameter {i}")))
    }

    fn str(&self, i: usize) -> Result<&'a str, RpcError> {
        self.value(i)?
            .as_str()
            .ok_or_else(|| RpcError::InvalidParams(format!("parameter {i} must be a string")))
    }

    fn address(&self, i: usize) -> Result<Address, RpcError> {
        self.str(i)?
            .parse()
            .map_err(|e| RpcError::InvalidParams(format!("parameter {i}: {e}")))
    }

    fn u64(&self, i: usize) -> Result<u64, RpcError> {
        let v = self.value(i)?;
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| RpcError::InvalidParams(format!("parameter {i} must be an unsigned integer")))
    }

    fn amount(&self, i: usize) -> Result<BigUint, RpcError> {
        let v = self.value(i)?;
        let parsed = match v {
            Value::String(s) => parse_amount(s),
            Value::Number(_) => self.u64(i).ok().map(BigUint::from),
            _ => None,
        };
        parsed.ok_or_else(|| RpcError::InvalidParams(format!("parameter {i} must be an amount")))
    }
}

// ---------------------------------------------------------------------------
// Rpc
// ---------------------------------------------------------------------------

/// Method dispatcher over the node's components.
pub struct Rpc {
    vault: Arc<Vault>,
    chain: Arc<dyn Chain>,
    mempool: Arc<Mempool>,
    driver: Arc<ConsensusDriver>,
    outbound: Arc<dyn Outbound>,
    min_gas_price: u64,
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rpc").finish_non_exhaustive()
    }
}

impl Rpc {
    pub fn new(
        vault: Arc<Vault>,
        chain: Arc<dyn Chain>,
        mempool: Arc<Mempool>,
        driver: Arc<ConsensusDriver>,
        outbound: Arc<dyn Outbound>,
        min_gas_price: u64,
    ) -> Self {
        Self {
            vault,
            chain,
            mempool,
            driver,
            outbound,
            min_gas_price,
        }
    }

    /// Runs `method`. Never panics, never returns `Err`.
    pub fn execute(&self, method: &str, params: &[Value]) -> RpcResult {
        debug!(method, params = params.len(), "rpc call");
        match self.dispatch(method, Params(params)) {
            Ok(Some(result)) => result,
            Ok(None) => RpcResult::MethodNotSupported {
                method: method.to_string(),
            },
            Err(e) => {
                warn!(method, error = %e, "rpc call failed");
                RpcResult::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    fn dispatch(&self, method: &str, p: Params<'_>) -> Result<Option<RpcResult>, RpcError> {
        let result = match method {
            "account.getAll" => RpcResult::Accounts(self.vault.get_all().iter().map(AccountView::from).collect()),
            "account.getCount" => RpcResult::Count(self.vault.count() as u64),
            "account.create" => self.create_account(&p)?,
            "account.restore" => {
                let restored = self.vault.restore(p.str(0)?, p.str(1)?)?;
                RpcResult::Restored(RestoredView {
                    address: restored.address,
                    public_key: restored.public_key,
                })
            }
            "account.verify" => RpcResult::Address(self.vault.verify_account(&p.address(0)?, p.str(1)?)?),
            "account.getBalance" => {
                let address = p.address(0)?;
                let balance = self
                    .vault
                    .balance(&address)
                    .ok_or_else(|| RpcError::NotFound(format!("account {address}")))?;
                RpcResult::Balance(BalanceView {
                    address,
                    balance: balance.to_str_radix(10),
                })
            }
            "account.faucet" => self.faucet(&p)?,
            "account.inputs" => {
                let address = p.address(0)?;
                let inputs = self
                    .vault
                    .inputs(&address)
                    .ok_or_else(|| RpcError::NotFound(format!("account {address}")))?;
                RpcResult::Inputs(
                    inputs
                        .snapshot()
                        .into_iter()
                        .map(|(hash, amount)| (hash, amount.to_str_radix(10)))
                        .collect(),
                )
            }
            "chain.getMinimumGasValue" => RpcResult::GasPrice(self.min_gas_price),
            "cerera.getInfo" => RpcResult::Info(self.info()),
            "cerera.getBlockCount" => RpcResult::Count(self.chain.latest_block().height()),
            "cerera.getBlockHash" => {
                let height = p.u64(0)?;
                let block = self
                    .chain
                    .block_by_number(height)
                    .ok_or_else(|| RpcError::NotFound(format!("block {height}")))?;
                RpcResult::Hash(block.hash())
            }
            "cerera.getBlock" => {
                let hash: Hash32 = p
                    .str(0)?
                    .parse()
                    .map_err(|e| RpcError::InvalidParams(format!("parameter 0: {e}")))?;
                let block = self
                    .chain
                    .block_by_hash(&hash)
                    .ok_or_else(|| RpcError::NotFound(format!("block {hash}")))?;
                RpcResult::Block(Box::new(block))
            }
            "cerera.getMemPool" => RpcResult::MemPool(MemPoolInfo {
                size: self.mempool.size(),
                hashes: self.mempool.pending_hashes(),
            }),
            "cerera.sendTransaction" => {
                let tx: Transaction = serde_json::from_value(p.value(0)?.clone())
                    .map_err(|e| RpcError::InvalidParams(format!("transaction: {e}")))?;
                RpcResult::Hash(self.submit(tx)?)
            }
            "cerera.getVersion" => RpcResult::Version(PROTOCOL_VERSION.to_string()),
            "cerera.consensus.join" => {
                let address = p.address(0)?;
                if self.driver.validators().contains(&address) {
                    self.chain.idle();
                    info!(%address, "chain idled for joining validator");
                    RpcResult::Text(format!("LATEST#{}", self.chain.latest_block().height()))
                } else {
                    RpcResult::Text(JOIN_DONE.to_string())
                }
            }
            "cerera.consensus.sync" => {
                let latest = self.chain.latest_block().height();
                RpcResult::Blocks((0..=latest).filter_map(|h| self.chain.block_by_number(h)).collect())
            }
            "cerera.consensus.done" => RpcResult::Text(CONSENSUS_DONE.to_string()),
            "cerera.consensus.ready" => {
                self.chain.resume();
                RpcResult::Hash(self.chain.latest_block().hash())
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn create_account(&self, p: &Params<'_>) -> Result<RpcResult, RpcError> {
        // `[name, passphrase]` or `[passphrase]`; the name is not stored.
        let passphrase = match p.0.len() {
            0 => return Err(RpcError::InvalidParams("passphrase required".into())),
            1 => p.str(0)?,
            _ => p.str(1)?,
        };
        let created = self.vault.create(passphrase)?;
        Ok(RpcResult::Created(CreatedView {
            address: created.address,
            public_key: created.public_key,
            mnemonic: created.mnemonic,
        }))
    }

    /// Queues a faucet transaction. It is applied once consensus finalizes
    /// it, on every replica.
    fn faucet(&self, p: &Params<'_>) -> Result<RpcResult, RpcError> {
        let to = p.address(0)?;
        let amount = p.amount(1)?;
        let nonce = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let tx = TransactionBuilder::faucet(to).value(amount).nonce(nonce).build()?;
        Ok(RpcResult::Hash(self.submit(tx)?))
    }

    /// Admits `tx` locally and forwards it to peers as `OP_TX`.
    fn submit(&self, tx: Transaction) -> Result<Hash32, RpcError> {
        let sender_key = self.vault.get(&tx.from).and_then(|a| a.public_key);
        let frame = Message::OpTx(tx.clone())
            .encode()
            .map_err(|e| RpcError::Encoding(e.to_string()))?;
        let hash = self.mempool.add(tx, sender_key.as_ref())?;
        self.outbound.broadcast(&frame);
        info!(%hash, "transaction submitted");
        Ok(hash)
    }

    fn info(&self) -> ChainInfo {
        let latest = self.chain.latest_block();
        ChainInfo {
            chain_id: CHAIN_ID,
            network: NETWORK_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            height: latest.height(),
            latest_hash: latest.hash(),
            blocks: self.chain.block_count(),
            validators: self.driver.validators().size(),
            primary: self.driver.primary().map(|p| p.address),
            accounts: self.vault.count(),
            idle: self.chain.is_idle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{ConsensusMetrics, DriverConfig, DriverDeps, ValidatorSet};
    use crate::crypto::keys::KeyPair;
    use crate::events::EventBus;
    use crate::execution::{ExecutionEngine, ExecutionPool};
    use crate::network::transport::MemoryNetwork;
    use crate::storage::MemoryChain;
    use crate::transaction::sign_transaction;
    use crate::vault::CooldownFaucetPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn rpc() -> (Rpc, Arc<Vault>, Arc<Mempool>) {
        let keypair = Arc::new(KeyPair::generate());
        let events = EventBus::new();
        let policy = Arc::new(CooldownFaucetPolicy::new(1u64, 1_000u64, Duration::from_secs(60)));
        let vault = Arc::new(Vault::in_memory(&keypair, policy, events.clone()));
        let chain: Arc<dyn Chain> = Arc::new(MemoryChain::new());
        let mempool = Arc::new(Mempool::default());
        let engine = Arc::new(ExecutionEngine::new(Arc::clone(&vault), events.clone(), 0));
        let (endpoint, _inbox) = MemoryNetwork::new().endpoint(keypair.address(), 8);
        let outbound: Arc<dyn Outbound> = Arc::new(endpoint);
        let driver = Arc::new(ConsensusDriver::new(
            DriverDeps {
                keypair,
                network_addr: String::new(),
                validators: ValidatorSet::new(),
                vault: Arc::clone(&vault),
                chain: Arc::clone(&chain),
                mempool: Arc::clone(&mempool),
                pool: Arc::new(ExecutionPool::spawn(engine, 1)),
                outbound: Arc::clone(&outbound),
                events,
                metrics: ConsensusMetrics::unregistered().unwrap(),
            },
            DriverConfig::default(),
        ));
        let rpc = Rpc::new(Arc::clone(&vault), chain, Arc::clone(&mempool), driver, outbound, 3);
        (rpc, vault, mempool)
    }

    #[tokio::test]
    async fn unknown_and_unsupported_methods() {
        let (rpc, _, _) = rpc();
        assert_eq!(
            rpc.execute("nope", &[]),
            RpcResult::MethodNotSupported {
                method: "nope".into()
            }
        );
        assert!(matches!(
            rpc.execute("cerera.signTransaction", &[json!("x")]),
            RpcResult::MethodNotSupported { .. }
        ));
    }

    #[tokio::test]
    async fn create_restore_verify() {
        let (rpc, _, _) = rpc();
        let RpcResult::Created(created) = rpc.execute("account.create", &[json!("w"), json!("p")]) else {
            panic!("expected created");
        };
        let restored = rpc.execute("account.restore", &[json!(created.mnemonic), json!("p")]);
        assert_eq!(
            restored,
            RpcResult::Restored(RestoredView {
                address: created.address,
                public_key: created.public_key.clone(),
            })
        );
        assert!(rpc
            .execute("account.restore", &[json!(created.mnemonic), json!("other")])
            .is_error());
        assert_eq!(
            rpc.execute("account.verify", &[json!(created.address.to_string()), json!("p")]),
            RpcResult::Address(created.address)
        );
        assert!(rpc
            .execute("account.verify", &[json!(created.address.to_string()), json!("bad")])
            .is_error());
    }

    #[tokio::test]
    async fn chain_queries() {
        let (rpc, _, _) = rpc();
        assert_eq!(rpc.execute("cerera.getBlockCount", &[]), RpcResult::Count(0));
        let RpcResult::Hash(genesis) = rpc.execute("cerera.getBlockHash", &[json!(0)]) else {
            panic!("expected hash");
        };
        assert!(matches!(
            rpc.execute("cerera.getBlock", &[json!(genesis.to_string())]),
            RpcResult::Block(_)
        ));
        assert!(rpc.execute("cerera.getBlockHash", &[json!(9)]).is_error());
        assert_eq!(rpc.execute("chain.getMinimumGasValue", &[]), RpcResult::GasPrice(3));
        assert_eq!(
            rpc.execute("cerera.getVersion", &[]),
            RpcResult::Version(PROTOCOL_VERSION.into())
        );
    }

    #[tokio::test]
    async fn consensus_join_idles_for_validators_only() {
        let (rpc, _, _) = rpc();
        let me = rpc.driver.address();
        assert_eq!(
            rpc.execute("cerera.consensus.join", &[json!(Address([1; 32]).to_string())]),
            RpcResult::Text(JOIN_DONE.into())
        );
        assert_eq!(
            rpc.execute("cerera.consensus.join", &[json!(me.to_string())]),
            RpcResult::Text("LATEST#0".into())
        );
        assert!(rpc.chain.is_idle());
        assert!(matches!(rpc.execute("cerera.consensus.ready", &[]), RpcResult::Hash(_)));
        assert!(!rpc.chain.is_idle());
    }

    #[tokio::test]
    async fn send_transaction_admits_signed_transfer() {
        let (rpc, vault, mempool) = rpc();
        let RpcResult::Created(created) = rpc.execute("account.create", &[json!("p")]) else {
            panic!("expected created");
        };
        let key = crate::crypto::mnemonic::recover(&created.mnemonic, "p").unwrap().keypair;
        assert!(vault.contains(&key.address()));

        let mut tx = TransactionBuilder::transfer(key.address(), Address([2; 32]))
            .value(1u64)
            .build()
            .unwrap();
        sign_transaction(&mut tx, &key).unwrap();
        let hash = tx.hash;

        let result = rpc.execute("cerera.sendTransaction", &[serde_json::to_value(&tx).unwrap()]);
        assert_eq!(result, RpcResult::Hash(hash));
        assert!(mempool.contains(&hash));
        assert!(rpc
            .execute("cerera.sendTransaction", &[serde_json::to_value(&tx).unwrap()])
            .is_error());

        let RpcResult::MemPool(info) = rpc.execute("cerera.getMemPool", &[]) else {
            panic!("expected mempool");
        };
        assert_eq!(info.hashes, vec![hash]);
    }

    #[tokio::test]
    async fn faucet_queues_and_balance_reads() {
        let (rpc, _, mempool) = rpc();
        let to = Address([5; 32]);
        assert!(matches!(
            rpc.execute("account.faucet", &[json!(to.to_string()), json!(50)]),
            RpcResult::Hash(_)
        ));
        assert_eq!(mempool.size(), 1);
        assert!(rpc.execute("account.getBalance", &[json!(to.to_string())]).is_error());
        assert!(rpc.execute("account.faucet", &[json!("0xzz"), json!(1)]).is_error());

        let RpcResult::Balance(b) = rpc.execute("account.getBalance", &[json!(Address::faucet().to_string())]) else {
            panic!("expected balance");
        };
        assert_eq!(b.balance, crate::config::FAUCET_SUPPLY.to_string());
    }

    #[test]
    fn results_are_tagged() {
        let json = serde_json::to_value(RpcResult::Count(3)).unwrap();
        assert_eq!(json, json!({"kind": "count", "value": 3}));
        let json = serde_json::to_value(RpcResult::Error {
            message: "x".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["value"]["message"], "x");
    }

    #[test]
    fn positional_params() {
        assert!(positional(Value::Null).is_empty());
        assert_eq!(positional(json!([1, 2])).len(), 2);
        assert_eq!(positional(json!("a")), vec![json!("a")]);
    }
}
