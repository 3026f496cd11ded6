//! # Protocol Configuration & Constants
//!
//! Every fixed number the node depends on lives here, grouped by the
//! subsystem that reads it. Runtime knobs that an operator may change are
//! collected into [`NodeConfig`], which the binary fills from CLI flags.
//!
//! Wire constants (tag width, signature width) are shared with existing
//! peers. Changing them splits the network.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chain Identity
// ---------------------------------------------------------------------------

/// Chain identifier carried in `cerera.getInfo`.
pub const CHAIN_ID: u64 = 133_707_331;

/// Software version reported by `cerera.getVersion`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Human-readable network name.
pub const NETWORK_NAME: &str = "cerera";

// ---------------------------------------------------------------------------
// Wire Format
// ---------------------------------------------------------------------------

/// Width of the zero-padded ASCII type tag at the front of every frame.
pub const TAG_LENGTH: usize = 12;

/// Width of the signature suffix on signed frames. DER signatures are
/// left-padded with zeros up to this width.
pub const SIGNATURE_LENGTH: usize = 71;

/// Frame delimiter on the byte stream.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Upper bound on a single inbound frame. Anything larger is discarded
/// and the connection is dropped.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Output size of BLAKE2b-256, used for every digest and address.
pub const HASH_LENGTH: usize = 32;

/// Address width in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// AES-256 key length for the vault file.
pub const VAULT_KEY_LENGTH: usize = 32;

/// CFB initialization vector length (one AES block).
pub const VAULT_IV_LENGTH: usize = 16;

/// Number of words in a freshly generated recovery phrase.
pub const MNEMONIC_WORDS: usize = 24;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Maximum transaction payload size.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Minimum accepted gas price when a transaction carries gas.
pub const MIN_GAS_PRICE: u64 = 3;

/// Capacity of the pending transaction pool.
pub const MEMPOOL_CAPACITY: usize = 10_000;

// ---------------------------------------------------------------------------
// Special Accounts
// ---------------------------------------------------------------------------

/// The coinbase account. Funds block rewards and genesis allocations.
pub const COINBASE_ADDRESS_HEX: &str =
    "0xf00000000000000000000000000000000000000000000000000000000000000f";

/// The faucet account. Funds test drops through `account.faucet`.
pub const FAUCET_ADDRESS_HEX: &str =
    "0xf00000000000000000000000000000000000000000000000000000000000000a";

/// Initial coinbase balance when a vault is created.
pub const COINBASE_SUPPLY: u64 = 1_000_000_000;

/// Initial faucet balance when a vault is created.
pub const FAUCET_SUPPLY: u64 = 10_000_000;

/// Faucet policy defaults: smallest and largest single drop.
pub const FAUCET_MIN_DROP: u64 = 1;
pub const FAUCET_MAX_DROP: u64 = 1_000;

/// Faucet policy default: minimum spacing between drops to one address.
pub const FAUCET_COOLDOWN: Duration = Duration::from_secs(60 * 60);

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// View number. No view change exists, so the primary never rotates.
pub const DEFAULT_VIEW: u64 = 0;

/// Per-round deadline measured from round creation.
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the driver sweeps for expired rounds and drains the mempool.
pub const DRIVER_TICK: Duration = Duration::from_millis(250);

/// Terminal rounds older than this many timeouts are evicted from the
/// registry.
pub const ROUND_RETENTION_FACTOR: u32 = 6;

/// Bounded capacity of the driver inbox.
pub const DRIVER_INBOX_CAPACITY: usize = 1_024;

/// Bounded capacity of each per-peer outgoing queue.
pub const PEER_QUEUE_CAPACITY: usize = 256;

/// Default number of vault mutation workers.
pub const DEFAULT_EXECUTION_WORKERS: usize = 4;

/// Capacity of the observer event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Networking & Files
// ---------------------------------------------------------------------------

/// Default node-to-node listen port.
pub const DEFAULT_P2P_PORT: u16 = 6116;

/// Default HTTP JSON-RPC port.
pub const DEFAULT_RPC_PORT: u16 = 1337;

/// Default encrypted account store.
pub const DEFAULT_VAULT_FILE: &str = "vault.dat";

/// Default peers file.
pub const DEFAULT_PEERS_FILE: &str = "swarm.ddd";

/// Default node key file.
pub const DEFAULT_KEY_FILE: &str = "ddddd.nodekey.pem";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Operating mode of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    /// Listen for peers and run the driver.
    Server,
    /// Dial known peers and ask the primary to join.
    Client,
    /// Listen and also dial every peer in the peers file.
    P2p,
}

impl FromStr for NodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            "p2p" => Ok(Self::P2p),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Faucet policy limits, injected into the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetConfig {
    pub min_drop: u64,
    pub max_drop: u64,
    /// Cooldown between drops to the same address, in seconds.
    pub cooldown_secs: u64,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            min_drop: FAUCET_MIN_DROP,
            max_drop: FAUCET_MAX_DROP,
            cooldown_secs: FAUCET_COOLDOWN.as_secs(),
        }
    }
}

/// Everything a [`Node`](crate::node::Node) needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the node-to-node listener binds to.
    pub listen: SocketAddr,
    /// `host:port` other validators dial to reach this node. Defaults to
    /// `listen`.
    #[serde(default)]
    pub advertise: Option<String>,
    /// Path of the PEM-encoded node key.
    pub key_path: PathBuf,
    pub mode: NodeMode,
    /// HTTP JSON-RPC port. `None` disables the HTTP endpoint.
    pub http_port: Option<u16>,
    /// When set, the primary drains the mempool into consensus requests.
    pub miner: bool,
    /// Keep the vault in memory only.
    pub in_memory: bool,
    pub vault_path: PathBuf,
    pub peers_path: PathBuf,
    /// Round deadline, in milliseconds.
    pub round_timeout_ms: u64,
    pub execution_workers: usize,
    pub min_gas_price: u64,
    pub faucet: FaucetConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_P2P_PORT)),
            advertise: None,
            key_path: PathBuf::from(DEFAULT_KEY_FILE),
            mode: NodeMode::Server,
            http_port: None,
            miner: false,
            in_memory: false,
            vault_path: PathBuf::from(DEFAULT_VAULT_FILE),
            peers_path: PathBuf::from(DEFAULT_PEERS_FILE),
            round_timeout_ms: ROUND_TIMEOUT.as_millis() as u64,
            execution_workers: DEFAULT_EXECUTION_WORKERS,
            min_gas_price: MIN_GAS_PRICE,
            faucet: FaucetConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Round deadline as a [`Duration`].
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// Network address announced in `Join`.
    pub fn advertised_addr(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| self.listen.to_string())
    }
}
