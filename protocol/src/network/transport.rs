//! # Transport Adapter
//!
//! Newline-delimited frames over TCP.
//!
//! ## Outbound
//!
//! Every known peer gets one writer task that owns a persistent connection
//! and a bounded queue of outgoing frames. `broadcast` and `unicast` only
//! enqueue, so the consensus driver never waits on a socket. When a write
//! fails the task logs it, drops the connection and dials again.
//!
//! ## Inbound
//!
//! The listener spawns one reader per accepted connection. Readers collect
//! bytes in a `BytesMut`, cut frames at `\n` and push them into the driver
//! inbox with `try_send`. A full inbox drops the frame instead of stalling
//! the connection.
//!
//! ## Delimiter escaping
//!
//! Signatures are binary and may contain `0x0a`. Before writing, `\n`
//! becomes `ESC n` and `ESC` becomes `ESC ESC`, with `ESC = 0x1b`. Frames
//! made only of JSON text pass through unchanged.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{FRAME_DELIMITER, MAX_FRAME_BYTES, PEER_QUEUE_CAPACITY};
use crate::crypto::keys::Address;

const ESCAPE: u8 = 0x1b;
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown peer {0}")]
    UnknownPeer(Address),

    #[error("outgoing queue for {0} is full")]
    QueueFull(Address),

    #[error("transport closed")]
    Closed,
}

/// Sends frames to other nodes. Frames are passed without delimiter.
pub trait Outbound: Send + Sync {
    /// Enqueues `frame` for every peer. Per-peer failures are logged.
    fn broadcast(&self, frame: &[u8]);

    fn unicast(&self, to: &Address, frame: &[u8]) -> Result<(), TransportError>;

    /// Starts delivering to a newly admitted validator. Transports without
    /// a dialing step ignore it.
    fn connect(&self, _address: Address, _network_addr: &str) {}
}

// ---------------------------------------------------------------------------
// Framing helpers
// ---------------------------------------------------------------------------

/// Escapes delimiter bytes and appends the delimiter.
pub fn encode_line(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 1);
    for &b in frame {
        match b {
            FRAME_DELIMITER => out.extend_from_slice(&[ESCAPE, b'n']),
            ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPE]),
            other => out.push(other),
        }
    }
    out.push(FRAME_DELIMITER);
    out
}

/// Reverses [`encode_line`] for one line without its delimiter.
pub fn decode_line(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut bytes = line.iter();
    while let Some(&b) = bytes.next() {
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(FRAME_DELIMITER),
            Some(&other) => out.push(other),
            None => out.push(ESCAPE),
        }
    }
    out
}

/// Pops every complete frame off the front of `buf`.
fn drain_frames(buf: &mut BytesMut) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == FRAME_DELIMITER) {
        let line = buf.split_to(pos);
        buf.advance(1);
        if !line.is_empty() {
            frames.push(decode_line(&line));
        }
    }
    frames
}

// ---------------------------------------------------------------------------
// TcpTransport
// ---------------------------------------------------------------------------

struct PeerHandle {
    network_addr: String,
    queue: mpsc::Sender<Vec<u8>>,
}

/// The TCP transport shared by the driver, the RPC layer and `main`.
pub struct TcpTransport {
    peers: RwLock<HashMap<Address, PeerHandle>>,
    inbox: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peers", &self.peers.read().len())
            .finish()
    }
}

impl TcpTransport {
    /// `inbox` receives every inbound frame, delimiter and escaping removed.
    pub fn new(inbox: mpsc::Sender<Vec<u8>>, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        Arc::new(Self {
            peers: RwLock::new(HashMap::new()),
            inbox,
            shutdown,
        })
    }

    /// Binds the listener and spawns the accept loop.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "transport listening");

        let inbox = self.inbox.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            debug!(%remote, "inbound connection");
                            let inbox = inbox.clone();
                            tokio::spawn(async move {
                                let (reader, _writer) = stream.into_split();
                                read_frames(reader, remote.to_string(), inbox).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    },
                    _ = shutdown.changed() => {
                        info!("transport listener stopped");
                        return;
                    }
                }
            }
        });
        Ok(local)
    }

    /// Registers a peer and spawns its writer task. Re-adding a known
    /// address replaces the old connection.
    pub fn add_peer(&self, address: Address, network_addr: impl Into<String>) {
        let network_addr = network_addr.into();
        let (queue, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
        tokio::spawn(run_peer_writer(
            address,
            network_addr.clone(),
            rx,
            self.inbox.clone(),
            self.shutdown.clone(),
        ));
        self.peers.write().insert(
            address,
            PeerHandle {
                network_addr,
                queue,
            },
        );
        info!(peer = %address, "peer registered");
    }

    pub fn remove_peer(&self, address: &Address) -> bool {
        self.peers.write().remove(address).is_some()
    }

    pub fn peers(&self) -> Vec<(Address, String)> {
        self.peers
            .read()
            .iter()
            .map(|(a, h)| (*a, h.network_addr.clone()))
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

impl Outbound for TcpTransport {
    fn broadcast(&self, frame: &[u8]) {
        let line = encode_line(frame);
        for (address, handle) in self.peers.read().iter() {
            if let Err(e) = handle.queue.try_send(line.clone()) {
                warn!(peer = %address, error = %e, "broadcast to peer failed");
            }
        }
    }

    fn unicast(&self, to: &Address, frame: &[u8]) -> Result<(), TransportError> {
        let peers = self.peers.read();
        let handle = peers.get(to).ok_or(TransportError::UnknownPeer(*to))?;
        handle.queue.try_send(encode_line(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(*to),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn connect(&self, address: Address, network_addr: &str) {
        let known = self
            .peers
            .read()
            .get(&address)
            .is_some_and(|h| h.network_addr == network_addr);
        if !known {
            self.add_peer(address, network_addr);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

async fn run_peer_writer(
    peer: Address,
    network_addr: String,
    mut queue: mpsc::Receiver<Vec<u8>>,
    inbox: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: Option<Vec<u8>> = None;

    'connect: loop {
        if *shutdown.borrow() {
            return;
        }
        let stream = match TcpStream::connect(&network_addr).await {
            Ok(s) => s,
            Err(e) => {
                debug!(%peer, addr = %network_addr, error = %e, "dial failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue 'connect,
                    _ = shutdown.changed() => return,
                }
            }
        };
        info!(%peer, addr = %network_addr, "peer connected");

        let (reader, mut writer) = stream.into_split();
        let reader_task = tokio::spawn(read_frames(reader, network_addr.clone(), inbox.clone()));

        loop {
            let line = match pending.take() {
                Some(line) => line,
                None => tokio::select! {
                    next = queue.recv() => match next {
                        Some(line) => line,
                        None => {
                            reader_task.abort();
                            return;
                        }
                    },
                    _ = shutdown.changed() => {
                        reader_task.abort();
                        return;
                    }
                },
            };
            if let Err(e) = writer.write_all(&line).await {
                warn!(%peer, error = %e, "write to peer failed, reconnecting");
                pending = Some(line);
                reader_task.abort();
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue 'connect;
            }
        }
    }
}

async fn read_frames<R>(mut reader: R, remote: String, inbox: mpsc::Sender<Vec<u8>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(%remote, "connection closed");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%remote, error = %e, "read failed");
                return;
            }
        }

        for frame in drain_frames(&mut buf) {
            if let Err(e) = inbox.try_send(frame) {
                warn!(%remote, error = %e, "inbox full, frame dropped");
            }
        }

        if buf.len() > MAX_FRAME_BYTES {
            warn!(%remote, buffered = buf.len(), "frame exceeds limit, dropping connection");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryNetwork
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Hub {
    inboxes: HashMap<Address, mpsc::Sender<Vec<u8>>>,
    offline: std::collections::HashSet<Address>,
}

/// In-process network for tests and benches. Endpoints deliver frames
/// straight into each other's inbox.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<RwLock<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` and returns its outbound handle and inbox.
    pub fn endpoint(&self, address: Address, capacity: usize) -> (MemoryEndpoint, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.hub.write().inboxes.insert(address, tx);
        (
            MemoryEndpoint {
                local: address,
                hub: Arc::clone(&self.hub),
            },
            rx,
        )
    }

    /// An offline node neither sends nor receives.
    pub fn set_offline(&self, address: Address, offline: bool) {
        let mut hub = self.hub.write();
        if offline {
            hub.offline.insert(address);
        } else {
            hub.offline.remove(&address);
        }
    }
}

#[derive(Clone)]
pub struct MemoryEndpoint {
    local: Address,
    hub: Arc<RwLock<Hub>>,
}

impl MemoryEndpoint {
    pub fn local(&self) -> Address {
        self.local
    }
}

impl Outbound for MemoryEndpoint {
    fn broadcast(&self, frame: &[u8]) {
        let hub = self.hub.read();
        if hub.offline.contains(&self.local) {
            return;
        }
        for (address, inbox) in &hub.inboxes {
            if *address == self.local || hub.offline.contains(address) {
                continue;
            }
            if let Err(e) = inbox.try_send(frame.to_vec()) {
                warn!(peer = %address, error = %e, "broadcast to peer failed");
            }
        }
    }

    fn unicast(&self, to: &Address, frame: &[u8]) -> Result<(), TransportError> {
        let hub = self.hub.read();
        if hub.offline.contains(&self.local) || hub.offline.contains(to) {
            return Ok(());
        }
        let inbox = hub.inboxes.get(to).ok_or(TransportError::UnknownPeer(*to))?;
        inbox.try_send(frame.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(*to),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}
