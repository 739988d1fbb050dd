//! Write-Ahead Log
//!
//! Durability backbone of the store: every mutation is appended here and
//! fsynced before it is acknowledged. Entries are framed as RESP2 arrays so
//! the log shares its codec with the wire protocol and the snapshot file:
//!
//! ```text
//! [Integer index, Integer timestamp, Integer term, Integer op_type,
//!  BulkString key, value]
//! ```
//!
//! The log supports atomic rotation: the live file is renamed aside in a
//! single filesystem operation and a fresh file starts at offset zero, while
//! the returned handle still reads the full pre-rotation history. A crash at
//! any point leaves either the original file at `path` or the rotated file
//! at `path.<nanos>` plus a new empty file at `path`.
//!
//! Not internally synchronized; the storage service serializes all mutators.

use crate::protocol::{OpKind, ParseError, RespParser, RespValue};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;

/// Errors that can occur in WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("corrupt WAL entry: {0}")]
    Corrupt(String),

    /// The file ends in the middle of a frame (torn trailing write).
    #[error("truncated WAL entry at offset {0}")]
    Truncated(u64),
}

/// A single entry in the write-ahead log.
///
/// `term` is carried through for forward compatibility with replication and
/// is always written as 0 by the current writer. `timestamp` is wall-clock
/// seconds at append time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub index: u64,
    pub timestamp: i64,
    pub term: u64,
    pub op: OpKind,
    pub key: String,
    pub value: RespValue,
}

impl WalEntry {
    /// Builds an entry stamped with the current wall clock and term 0.
    ///
    /// Operations that carry no value (GET, DELETE, PING) use a null
    /// placeholder in the `value` slot.
    pub fn new(index: u64, op: OpKind, key: String, value: RespValue) -> Self {
        Self {
            index,
            timestamp: unix_timestamp(),
            term: 0,
            op,
            key,
            value,
        }
    }

    /// Encodes this entry as the on-disk RESP2 array.
    pub fn to_value(&self) -> RespValue {
        RespValue::Array(vec![
            RespValue::Integer(self.index as i64),
            RespValue::Integer(self.timestamp),
            RespValue::Integer(self.term as i64),
            RespValue::Integer(self.op.code()),
            RespValue::BulkString(Bytes::from(self.key.clone())),
            self.value.clone(),
        ])
    }

    /// Decodes an entry from its on-disk RESP2 array.
    pub fn from_value(value: RespValue) -> Result<Self, WalError> {
        let arr = value
            .into_array()
            .ok_or_else(|| WalError::Corrupt("expected array".to_string()))?;
        if arr.len() != 6 {
            return Err(WalError::Corrupt(format!(
                "expected 6 elements, got {}",
                arr.len()
            )));
        }

        let mut fields = arr.into_iter();
        let index = int_field(fields.next(), "index")?;
        let timestamp = int_field(fields.next(), "timestamp")?;
        let term = int_field(fields.next(), "term")?;
        let op_code = int_field(fields.next(), "op_type")?;
        let op = OpKind::try_from(op_code)
            .map_err(|e| WalError::Corrupt(e.to_string()))?;

        // An empty key serializes as the null bulk string, so a null here
        // reads back as empty rather than as corruption.
        let key = match fields.next() {
            Some(RespValue::Null) => String::new(),
            Some(v) => match v.as_str() {
                Some(s) => s.to_string(),
                None => return Err(WalError::Corrupt("expected bulk string key".to_string())),
            },
            None => return Err(WalError::Corrupt("missing key".to_string())),
        };

        // The value slot holds whatever the writer put there; GET and DELETE
        // entries carry a null placeholder and both forms are accepted.
        let value = fields
            .next()
            .ok_or_else(|| WalError::Corrupt("missing value".to_string()))?;

        Ok(Self {
            index: index as u64,
            timestamp,
            term: term as u64,
            op,
            key,
            value,
        })
    }
}

fn int_field(value: Option<RespValue>, name: &str) -> Result<i64, WalError> {
    value
        .and_then(|v| v.as_integer())
        .ok_or_else(|| WalError::Corrupt(format!("expected integer for {}", name)))
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// An append-only write-ahead log over a single file.
pub struct Wal {
    path: PathBuf,
    file: File,
    size: u64,
}

impl Wal {
    /// Opens (or creates) the log at `path`, creating parent directories as
    /// needed. The file is opened append + read so the same handle serves
    /// both `append` and `replay`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        Ok(Self { path, file, size })
    }

    /// The path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cumulative bytes appended to this file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Appends one entry, and fsyncs before returning when `sync` is set.
    ///
    /// Only after the fsync completes may the caller acknowledge the
    /// mutation to a client.
    pub async fn append(&mut self, entry: &WalEntry, sync: bool) -> Result<(), WalError> {
        let payload = entry.to_value().serialize();
        self.file.write_all(&payload).await?;
        self.size += payload.len() as u64;

        if sync {
            self.file.sync_data().await?;
        }
        Ok(())
    }

    /// Reads the log from the beginning and returns all entries in append
    /// order.
    ///
    /// A file ending mid-frame is reported as [`WalError::Truncated`]; a
    /// malformed frame anywhere fails the whole replay.
    pub async fn replay(&mut self) -> Result<Vec<WalEntry>, WalError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        let mut buf = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut buf).await?;

        let mut parser = RespParser::new();
        let mut entries = Vec::new();
        let mut pos = 0usize;

        while pos < buf.len() {
            match parser.parse(&buf[pos..])? {
                Some((value, consumed)) => {
                    entries.push(WalEntry::from_value(value)?);
                    pos += consumed;
                }
                None => return Err(WalError::Truncated(pos as u64)),
            }
        }

        Ok(entries)
    }

    /// Rotates the log.
    ///
    /// Fsyncs the current file, renames `path` to `path.<nanos>` in a single
    /// filesystem operation, and opens a fresh file at `path` whose size is
    /// zero. Returns a `Wal` over the rotated file (the still-open handle
    /// follows the rename); the caller owns and closes it.
    pub async fn rotate(&mut self) -> Result<Wal, WalError> {
        self.file.sync_data().await?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut rotated_path = self.path.clone().into_os_string();
        rotated_path.push(format!(".{}", nanos));
        let rotated_path = PathBuf::from(rotated_path);

        tokio::fs::rename(&self.path, &rotated_path).await?;

        let new_file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)
            .await?;

        let old_file = std::mem::replace(&mut self.file, new_file);
        let old_size = std::mem::replace(&mut self.size, 0);

        debug!(rotated = %rotated_path.display(), bytes = old_size, "rotated WAL");

        Ok(Wal {
            path: rotated_path,
            file: old_file,
            size: old_size,
        })
    }

    /// Releases the underlying file.
    pub async fn close(self) -> Result<(), WalError> {
        drop(self.file);
        Ok(())
    }
}
