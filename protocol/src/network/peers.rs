//! The `swarm.ddd` peers file.
//!
//! One peer per line, `0x<address>:<host>:<port>`, optionally followed by
//! whitespace and the peer's SEC1 public key in hex. Lines starting with
//! `#` and blank lines are ignored. The address is everything before the
//! first colon, so IPv6 hosts in brackets work too.
//!
//! A peer listed with its key is a validator from startup. A peer without
//! one is only dialled; it becomes a validator once it joins.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::crypto::keys::{Address, PublicKey};

#[derive(Debug, Error)]
pub enum PeerBookError {
    #[error("cannot read peers file: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub address: Address,
    /// `host:port`.
    pub network_addr: String,
    pub public_key: Option<PublicKey>,
}

impl fmt::Display for PeerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.network_addr)?;
        if let Some(key) = &self.public_key {
            write!(f, " {}", key.to_hex())?;
        }
        Ok(())
    }
}

/// Parsed peers file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerBook {
    entries: Vec<PeerEntry>,
}

impl PeerBook {
    pub fn load(path: &Path) -> Result<Self, PeerBookError> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Like [`load`](Self::load), but a missing file is an empty book.
    pub fn load_or_empty(path: &Path) -> Result<Self, PeerBookError> {
        match std::fs::read_to_string(path) {
            Ok(text) => text.parse(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, address: &Address) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| &e.address == address)
    }

    pub fn push(&mut self, entry: PeerEntry) {
        self.entries.retain(|e| e.address != entry.address);
        self.entries.push(entry);
    }
}

impl FromStr for PeerBook {
    type Err = PeerBookError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut book = PeerBook::default();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |reason: String| PeerBookError::Malformed { line: i + 1, reason };

            let (addr, network) = line
                .split_once(':')
                .ok_or_else(|| malformed("expected <address>:<host:port>".into()))?;
            let address: Address = addr
                .trim()
                .parse()
                .map_err(|e| malformed(format!("bad address: {e}")))?;

            let mut fields = network.split_whitespace();
            let network = fields.next().unwrap_or_default();
            match network.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => return Err(malformed(format!("bad network address {network:?}"))),
            }

            let public_key = match fields.next() {
                Some(hex) => {
                    let key = PublicKey::from_hex(hex).map_err(|e| malformed(format!("bad public key: {e}")))?;
                    if key.address() != address {
                        return Err(malformed("public key does not match address".into()));
                    }
                    Some(key)
                }
                None => None,
            };
            if fields.next().is_some() {
                return Err(malformed("trailing fields".into()));
            }

            book.push(PeerEntry {
                address,
                network_addr: network.to_string(),
                public_key,
            });
        }
        Ok(book)
    }
}

impl fmt::Display for PeerBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
