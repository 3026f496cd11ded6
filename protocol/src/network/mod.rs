//! # Network Module
//!
//! Everything between the consensus driver and the wire: the frame codec,
//! typed protocol messages, the line-delimited TCP transport, the peers
//! file, the mempool that feeds the miner, and the RPC dispatcher.
//!
//! ## Architecture
//!
//! ```text
//! codec.rs      — 12-byte tag framing, JSON bodies, trailing signatures
//! message.rs    — typed messages and the Signed<T> envelope
//! transport.rs  — TCP transport, Outbound trait, in-memory test network
//! peers.rs      — swarm.ddd peers file
//! mempool.rs    — FIFO pending-transaction pool (TxSource)
//! rpc.rs        — method dispatcher returning typed RpcResult values
//! ```
//!
//! ## Design Decisions
//!
//! - Frames are opaque bytes to the transport. Only the codec knows about
//!   tags and signatures, so the transport can be swapped for the
//!   in-memory network in tests without touching the driver.
//! - One newline-delimited stream per peer. Frame bytes are escaped so a
//!   signature containing `\n` cannot split a frame.
//! - The RPC layer returns typed results only. HTTP serving happens in the
//!   node binary via axum; the protocol crate stays transport-agnostic.

pub mod codec;
pub mod mempool;
pub mod message;
pub mod peers;
pub mod rpc;
pub mod transport;

pub use codec::{CodecError, Tag};
pub use mempool::{Mempool, MempoolError, TxSource};
pub use message::{Message, Signed};
pub use peers::{PeerBook, PeerBookError, PeerEntry};
pub use rpc::{Rpc, RpcError, RpcResult};
pub use transport::{MemoryNetwork, Outbound, TcpTransport, TransportError};
