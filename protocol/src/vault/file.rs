//! # `vault.dat` On-Disk Format
//!
//! The vault file is a sequence of newline-terminated records. Each record
//! line is the lowercase hex of `IV(16) || AES-256-CFB(account JSON)`.
//!
//! ```text
//! 3f9a...e1\n        <- record
//! 0b77...4c      \n  <- record rewritten in place, padded with spaces
//!                \n  <- tombstone: the record moved to the end of the file
//! ```
//!
//! ## Rules
//!
//! - `save` only ever appends. If the file does not end in `\n` (someone
//!   wrote junk to it) a `\n` goes first so the new record gets its own line.
//! - `update` overwrites a record in place when the new line fits in the
//!   old slot, padding with spaces. Otherwise the old slot is blanked to
//!   spaces and the record is appended.
//! - `scan` skips blank lines silently and skips undecodable lines with a
//!   warning. One bad record never hides the others.
//!
//! Hex keeps ciphertext bytes from ever colliding with the delimiter.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::account::Account;
use super::error::VaultError;
use crate::crypto::encryption::{open, seal, VaultKey};
use crate::crypto::keys::Address;

/// Location and length of a record line, excluding its `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: u64,
    len: usize,
}

/// Result of a full file scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Decoded accounts in file order. A later record for an address
    /// supersedes an earlier one.
    pub accounts: Vec<Account>,
    /// Lines that failed to decode.
    pub skipped: usize,
}

/// Handle on an encrypted vault file plus an index of record offsets.
#[derive(Debug)]
pub struct VaultFile {
    path: PathBuf,
    key: VaultKey,
    slots: HashMap<Address, Slot>,
}

impl VaultFile {
    /// Opens (without reading) the vault file at `path`.
    pub fn new(path: impl Into<PathBuf>, key: VaultKey) -> Self {
        Self {
            path: path.into(),
            key,
            slots: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file is missing or zero-length.
    pub fn is_empty(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true)
    }

    /// Writes the first records of a brand-new vault.
    ///
    /// Fails with [`VaultError::VaultAlreadyExists`] if the file has content.
    pub fn init_secure(&mut self, accounts: &[Account]) -> Result<(), VaultError> {
        if !self.is_empty() {
            return Err(VaultError::VaultAlreadyExists(
                self.path.display().to_string(),
            ));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        File::create(&self.path)?;
        self.slots.clear();
        for account in accounts {
            self.save(account)?;
        }
        Ok(())
    }

    /// Reads every record in the file and rebuilds the offset index.
    pub fn scan(&mut self) -> Result<ScanReport, VaultError> {
        let mut bytes = Vec::new();
        match File::open(&self.path) {
            Ok(mut f) => {
                f.read_to_end(&mut bytes)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.slots.clear();
        let mut report = ScanReport::default();
        let mut offset = 0u64;

        for line in bytes.split(|&b| b == b'\n') {
            let line_offset = offset;
            offset += line.len() as u64 + 1;

            let trimmed = trim_whitespace(line);
            if trimmed.is_empty() {
                continue;
            }

            match self.decode_line(trimmed) {
                Ok(account) => {
                    self.slots.insert(
                        account.address,
                        Slot {
                            offset: line_offset,
                            len: line.len(),
                        },
                    );
                    report.accounts.push(account);
                }
                Err(reason) => {
                    warn!(
                        path = %self.path.display(),
                        offset = line_offset,
                        len = line.len(),
                        %reason,
                        "skipping unreadable vault record"
                    );
                    report.skipped += 1;
                }
            }
        }

        debug!(
            path = %self.path.display(),
            loaded = report.accounts.len(),
            skipped = report.skipped,
            "vault file scanned"
        );
        Ok(report)
    }

    /// Appends a freshly encrypted record. Existing bytes are untouched.
    pub fn save(&mut self, account: &Account) -> Result<(), VaultError> {
        let line = self.encode_line(account)?;
        let slot = self.append_line(&line)?;
        self.slots.insert(account.address, slot);
        Ok(())
    }

    /// Rewrites the record for `account.address` in place if the new line
    /// fits, otherwise tombstones the old line and appends.
    pub fn update(&mut self, account: &Account) -> Result<(), VaultError> {
        let line = self.encode_line(account)?;

        let Some(slot) = self.slots.get(&account.address).copied() else {
            let slot = self.append_line(&line)?;
            self.slots.insert(account.address, slot);
            return Ok(());
        };

        if line.len() <= slot.len {
            let mut padded = line;
            padded.resize(slot.len, b' ');
            self.write_at(slot.offset, &padded)?;
            return Ok(());
        }

        self.write_at(slot.offset, &vec![b' '; slot.len])?;
        let fresh = self.append_line(&line)?;
        self.slots.insert(account.address, fresh);
        Ok(())
    }

    /// Blanks the record for `address`, if any.
    pub fn tombstone(&mut self, address: &Address) -> Result<bool, VaultError> {
        match self.slots.remove(address) {
            Some(slot) => {
                self.write_at(slot.offset, &vec![b' '; slot.len])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.slots.contains_key(address)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn encode_line(&self, account: &Account) -> Result<Vec<u8>, VaultError> {
        let sealed = seal(&self.key, &account.to_bytes()?)?;
        Ok(hex::encode(sealed).into_bytes())
    }

    fn decode_line(&self, line: &[u8]) -> Result<Account, String> {
        let raw = hex::decode(line).map_err(|e| format!("not hex: {e}"))?;
        let plain = open(&self.key, &raw).map_err(|e| e.to_string())?;
        Account::from_bytes(&plain).map_err(|e| format!("not an account: {e}"))
    }

    fn append_line(&self, line: &[u8]) -> Result<Slot, VaultError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut len = file.metadata()?.len();
        if len > 0 && !ends_with_newline(&mut file)? {
            file.write_all(b"\n")?;
            len += 1;
        }

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        file.write_all(&buf)?;
        file.flush()?;

        Ok(Slot {
            offset: len,
            len: line.len(),
        })
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), VaultError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }
}

fn trim_whitespace(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
