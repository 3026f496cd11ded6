//! # Node
//!
//! [`Node`] owns every long-lived component of a validator and wires them
//! together: key, vault, chain, mempool, execution pool, transport,
//! consensus driver and RPC dispatcher. Nothing in the crate reaches for a
//! global; each component gets its collaborators from here.
//!
//! ## Lifecycle
//!
//! ```text
//! Node::new(config) -> start() -> [running] -> shutdown()
//! ```
//!
//! `new` does all fallible I/O that does not need the network: key file,
//! vault file, peers file. `start` binds the listener, dials peers as the
//! mode asks, spawns the driver and, in `client` mode, sends `Join`.
//!
//! ## Modes
//!
//! | Mode     | Listens | Dials peers | Sends `Join` |
//! |----------|---------|-------------|--------------|
//! | `server` | yes     | no          | no           |
//! | `p2p`    | yes     | yes         | no           |
//! | `client` | yes     | yes         | yes          |

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::Registry;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{NodeConfig, NodeMode, DRIVER_INBOX_CAPACITY, DRIVER_TICK, MEMPOOL_CAPACITY};
use crate::consensus::{
    ConsensusDriver, ConsensusError, ConsensusMetrics, DriverConfig, DriverDeps, ValidatorInfo,
    ValidatorSet,
};
use crate::crypto::keys::{Address, KeyError, KeyPair};
use crate::events::EventBus;
use crate::execution::{ExecutionEngine, ExecutionPool};
use crate::network::mempool::Mempool;
use crate::network::peers::{PeerBook, PeerBookError};
use crate::network::rpc::Rpc;
use crate::network::transport::{Outbound, TcpTransport, TransportError};
use crate::storage::{Chain, MemoryChain};
use crate::vault::{CooldownFaucetPolicy, Vault, VaultError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node key: {0}")]
    Key(#[from] KeyError),

    #[error("vault: {0}")]
    Vault(#[from] VaultError),

    #[error("peers file: {0}")]
    Peers(#[from] PeerBookError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("consensus: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("node already started")]
    AlreadyStarted,
}

/// A running (or ready to run) validator.
pub struct Node {
    config: NodeConfig,
    keypair: Arc<KeyPair>,
    key_generated: bool,
    peers: PeerBook,
    events: EventBus,
    registry: Registry,
    vault: Arc<Vault>,
    chain: Arc<dyn Chain>,
    mempool: Arc<Mempool>,
    pool: Arc<ExecutionPool>,
    transport: Arc<TcpTransport>,
    driver: Arc<ConsensusDriver>,
    rpc: Arc<Rpc>,
    inbox: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    shutdown: watch::Sender<bool>,
    driver_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.keypair.address())
            .field("mode", &self.config.mode)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Builds every component. Must run inside a tokio runtime because the
    /// execution pool spawns its workers here.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let (keypair, key_generated) = KeyPair::load_or_generate(&config.key_path)?;
        let keypair = Arc::new(keypair);
        let address = keypair.address();
        if key_generated {
            info!(%address, path = %config.key_path.display(), "node key generated");
        }

        let events = EventBus::new();
        let registry = Registry::new();
        let metrics = ConsensusMetrics::new(&registry)?;

        let faucet = Arc::new(CooldownFaucetPolicy::from_config(&config.faucet));
        let vault = Arc::new(if config.in_memory {
            Vault::in_memory(&keypair, faucet, events.clone())
        } else {
            Vault::open(&keypair, &config.vault_path, faucet, events.clone())?
        });

        let peers = PeerBook::load_or_empty(&config.peers_path)?;
        let validators = initial_validators(&peers, &vault, &address);

        let chain: Arc<dyn Chain> = Arc::new(MemoryChain::new());
        let mempool = Arc::new(Mempool::new(MEMPOOL_CAPACITY));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&vault),
            events.clone(),
            config.min_gas_price,
        ));
        let pool = Arc::new(ExecutionPool::spawn(engine, config.execution_workers));

        let (inbox_tx, inbox) = mpsc::channel(DRIVER_INBOX_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let transport = TcpTransport::new(inbox_tx, shutdown_rx);
        let outbound: Arc<dyn Outbound> = transport.clone();

        let driver = Arc::new(ConsensusDriver::new(
            DriverDeps {
                keypair: Arc::clone(&keypair),
                network_addr: config.advertised_addr(),
                validators,
                vault: Arc::clone(&vault),
                chain: Arc::clone(&chain),
                mempool: Arc::clone(&mempool),
                pool: Arc::clone(&pool),
                outbound: Arc::clone(&outbound),
                events: events.clone(),
                metrics,
            },
            DriverConfig {
                round_timeout: config.round_timeout(),
                tick: DRIVER_TICK,
                miner: config.miner,
            },
        ));

        let rpc = Arc::new(Rpc::new(
            Arc::clone(&vault),
            Arc::clone(&chain),
            Arc::clone(&mempool),
            Arc::clone(&driver),
            outbound,
            config.min_gas_price,
        ));

        info!(
            %address,
            mode = ?config.mode,
            peers = peers.len(),
            validators = driver.validators().size(),
            accounts = vault.count(),
            in_memory = config.in_memory,
            "node initialized"
        );

        Ok(Self {
            config,
            keypair,
            key_generated,
            peers,
            events,
            registry,
            vault,
            chain,
            mempool,
            pool,
            transport,
            driver,
            rpc,
            inbox: Mutex::new(Some(inbox)),
            shutdown,
            driver_task: Mutex::new(None),
        })
    }

    /// Binds the listener, dials peers as the mode asks and spawns the
    /// driver. Returns the bound listener address.
    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        let inbox = self.inbox.lock().take().ok_or(NodeError::AlreadyStarted)?;
        let local = self.transport.listen(self.config.listen).await?;

        if matches!(self.config.mode, NodeMode::P2p | NodeMode::Client) {
            let me = self.address();
            for entry in self.peers.entries().iter().filter(|e| e.address != me) {
                self.transport.add_peer(entry.address, entry.network_addr.clone());
            }
        }

        let driver = Arc::clone(&self.driver);
        let shutdown = self.shutdown.subscribe();
        *self.driver_task.lock() = Some(tokio::spawn(async move {
            driver.run(inbox, shutdown).await;
        }));

        if self.config.mode == NodeMode::Client {
            self.driver.request_join()?;
        }

        info!(
            address = %self.address(),
            %local,
            mode = ?self.config.mode,
            primary = self.driver.is_primary(),
            "node started"
        );
        Ok(local)
    }

    /// Stops the driver and the transport, then drains the execution pool.
    pub async fn shutdown(&self) {
        if self.shutdown.send(true).is_err() {
            warn!("shutdown signal had no receivers");
        }
        let task = self.driver_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "driver task ended abnormally");
            }
        }
        self.pool.shutdown().await;
        info!(address = %self.address(), "node stopped");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn keypair(&self) -> &Arc<KeyPair> {
        &self.keypair
    }

    /// True when `new` had to create the key file.
    pub fn key_generated(&self) -> bool {
        self.key_generated
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerBook {
        &self.peers
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Registry holding the consensus counters. The binary exports it.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn chain(&self) -> &Arc<dyn Chain> {
        &self.chain
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn transport(&self) -> &Arc<TcpTransport> {
        &self.transport
    }

    pub fn driver(&self) -> &Arc<ConsensusDriver> {
        &self.driver
    }

    pub fn rpc(&self) -> &Arc<Rpc> {
        &self.rpc
    }
}

/// Validators known at startup, in peers-file order: entries that carry a
/// public key, or whose key the vault already holds.
fn initial_validators(peers: &PeerBook, vault: &Vault, me: &Address) -> ValidatorSet {
    let mut set = ValidatorSet::new();
    for entry in peers.entries() {
        if &entry.address == me {
            continue;
        }
        let key = entry
            .public_key
            .clone()
            .or_else(|| vault.get(&entry.address).and_then(|a| a.public_key));
        match key {
            Some(key) => {
                set.add(ValidatorInfo::new(key, entry.network_addr.clone()));
            }
            None => info!(peer = %entry.address, "peer has no known key, not a validator until it joins"),
        }
    }
    set
}
