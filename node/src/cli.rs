//! # CLI Interface
//!
//! Command-line flags for the `cerera` binary, parsed with `clap` derive.
//! Every flag can also come from a `CERERA_*` environment variable, which
//! is how container deployments configure the node.
//!
//! The CLI is flat: there is one thing the binary does, run a validator.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use cerera_protocol::config::{
    FaucetConfig, NodeConfig, NodeMode, DEFAULT_EXECUTION_WORKERS, DEFAULT_KEY_FILE,
    DEFAULT_PEERS_FILE, DEFAULT_VAULT_FILE, MIN_GAS_PRICE, ROUND_TIMEOUT,
};

use crate::logging::LogFormat;

/// Cerera validator node.
///
/// Runs one member of a permissioned PBFT validator network, keeps the
/// encrypted account vault, and optionally serves JSON-RPC over HTTP.
#[derive(Parser, Debug)]
#[command(name = "cerera", about = "Cerera validator node", version)]
pub struct CereraCli {
    /// Address the node-to-node listener binds to.
    #[arg(long = "addr", env = "CERERA_ADDR", default_value = "0.0.0.0:6116")]
    pub listen: SocketAddr,

    /// `host:port` announced to other validators. Defaults to `--addr`.
    #[arg(long, env = "CERERA_ADVERTISE")]
    pub advertise: Option<String>,

    /// PEM file holding the node key. Generated on first start.
    #[arg(long, env = "CERERA_KEY", default_value = DEFAULT_KEY_FILE)]
    pub key: PathBuf,

    /// Operating mode.
    #[arg(long, env = "CERERA_MODE", value_enum, default_value_t = ModeArg::Server)]
    pub mode: ModeArg,

    /// Port for the HTTP JSON-RPC endpoint. Omit to disable HTTP.
    #[arg(long, env = "CERERA_HTTP")]
    pub http: Option<u16>,

    /// Drain the mempool into consensus requests when primary.
    #[arg(long, env = "CERERA_MINER")]
    pub miner: bool,

    /// Keep the vault in memory only.
    #[arg(long, env = "CERERA_MEM")]
    pub mem: bool,

    /// Encrypted account store.
    #[arg(long, env = "CERERA_VAULT", default_value = DEFAULT_VAULT_FILE)]
    pub vault: PathBuf,

    /// Peers file, one `0x<address>:<host:port>[ <pubkey>]` per line.
    #[arg(long, env = "CERERA_PEERS", default_value = DEFAULT_PEERS_FILE)]
    pub peers: PathBuf,

    /// Round deadline in milliseconds.
    #[arg(long, env = "CERERA_ROUND_TIMEOUT_MS", default_value_t = ROUND_TIMEOUT.as_millis() as u64)]
    pub round_timeout_ms: u64,

    /// Number of vault mutation workers.
    #[arg(long, env = "CERERA_WORKERS", default_value_t = DEFAULT_EXECUTION_WORKERS)]
    pub workers: usize,

    /// Minimum accepted gas price.
    #[arg(long, env = "CERERA_MIN_GAS_PRICE", default_value_t = MIN_GAS_PRICE)]
    pub min_gas_price: u64,

    /// Log output format.
    #[arg(long, env = "CERERA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "CERERA_LOG", default_value = "cerera=info,cerera_node=info,cerera_protocol=info,tower_http=info")]
    pub log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Server,
    Client,
    P2p,
}

impl From<ModeArg> for NodeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Server => NodeMode::Server,
            ModeArg::Client => NodeMode::Client,
            ModeArg::P2p => NodeMode::P2p,
        }
    }
}

impl CereraCli {
    /// Builds the protocol-level configuration from the parsed flags.
    pub fn to_config(&self) -> NodeConfig {
        NodeConfig {
            listen: self.listen,
            advertise: self.advertise.clone(),
            key_path: self.key.clone(),
            mode: self.mode.into(),
            http_port: self.http,
            miner: self.miner,
            in_memory: self.mem,
            vault_path: self.vault.clone(),
            peers_path: self.peers.clone(),
            round_timeout_ms: self.round_timeout_ms,
            execution_workers: self.workers.max(1),
            min_gas_price: self.min_gas_price,
            faucet: FaucetConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        CereraCli::command().debug_assert();
    }

    #[test]
    fn defaults_match_protocol_defaults() {
        let cli = CereraCli::try_parse_from(["cerera"]).unwrap();
        let cfg = cli.to_config();
        let defaults = NodeConfig::default();
        assert_eq!(cfg.listen, defaults.listen);
        assert_eq!(cfg.mode, NodeMode::Server);
        assert_eq!(cfg.vault_path, defaults.vault_path);
        assert_eq!(cfg.peers_path, defaults.peers_path);
        assert_eq!(cfg.round_timeout_ms, defaults.round_timeout_ms);
        assert!(cfg.http_port.is_none());
        assert!(!cfg.miner && !cfg.in_memory);
    }

    #[test]
    fn flags_flow_into_config() {
        let cli = CereraCli::try_parse_from([
            "cerera",
            "--addr",
            "127.0.0.1:7000",
            "--mode",
            "p2p",
            "--http",
            "8080",
            "--miner",
            "--mem",
            "--workers",
            "0",
            "--advertise",
            "node1.internal:7000",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);

        let cfg = cli.to_config();
        assert_eq!(cfg.listen.port(), 7000);
        assert_eq!(cfg.mode, NodeMode::P2p);
        assert_eq!(cfg.http_port, Some(8080));
        assert!(cfg.miner && cfg.in_memory);
        assert_eq!(cfg.execution_workers, 1);
        assert_eq!(cfg.advertised_addr(), "node1.internal:7000");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(CereraCli::try_parse_from(["cerera", "--mode", "miner"]).is_err());
    }
}
