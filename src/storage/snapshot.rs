//! Snapshot Engine
//!
//! A snapshot is a point-in-time image of the full store: a concatenation of
//! RESP2 arrays `[BulkString key, value]`, one per live key, terminated by
//! EOF. Snapshotting folds a rotated WAL into the previous snapshot and
//! atomically replaces the on-disk image:
//!
//! ```text
//! load snapshot ──▶ apply rotated WAL ──▶ write path.tmp ──▶ fsync ──▶ rename
//! ```
//!
//! The final rename is the only mutation of the snapshot path, so concurrent
//! readers observe either the old complete file or the new complete file,
//! never a half-written one. A failed snapshot leaves the previous image
//! untouched (a stale `path.tmp` may remain and is overwritten next time).

use crate::protocol::{OpKind, ParseError, RespParser, RespValue};
use crate::storage::store::MemoryStore;
use crate::storage::wal::{Wal, WalError};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Errors that can occur while loading or writing snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("corrupt snapshot entry: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Wal(#[from] WalError),
}

/// Loads and writes snapshots at a fixed path.
pub struct Snapshotter {
    path: PathBuf,
}

impl Snapshotter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot into a fresh store.
    ///
    /// An absent file yields an empty store; a malformed entry anywhere in
    /// the file fails the whole load.
    pub async fn load_snapshot(&self) -> Result<MemoryStore, SnapshotError> {
        let buf = match tokio::fs::read(&self.path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MemoryStore::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut parser = RespParser::new();
        let mut store = MemoryStore::new();
        let mut pos = 0usize;

        while pos < buf.len() {
            match parser.parse(&buf[pos..])? {
                Some((value, consumed)) => {
                    let (key, value) = decode_pair(value)?;
                    store.set(key, value);
                    pos += consumed;
                }
                None => {
                    return Err(SnapshotError::Corrupt(format!(
                        "incomplete entry at offset {}",
                        pos
                    )));
                }
            }
        }

        Ok(store)
    }

    /// Folds `rotated_wal` into the current snapshot and atomically replaces
    /// the on-disk image.
    ///
    /// The rotated WAL is only read; the caller closes or discards it.
    pub async fn snapshot(&self, rotated_wal: &mut Wal) -> Result<(), SnapshotError> {
        let mut store = self.load_snapshot().await?;

        let entries = rotated_wal.replay().await?;
        let folded = entries.len();
        for entry in entries {
            match entry.op {
                OpKind::Set => store.set(entry.key, entry.value),
                OpKind::Delete => store.delete(&entry.key),
                // Reads and pings carry no state
                OpKind::Get | OpKind::Ping => {}
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;

        let mut buf = Vec::new();
        for (key, value) in store.iter() {
            buf.clear();
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from(key.clone())),
                value.clone(),
            ])
            .serialize_into(&mut buf);
            file.write_all(&buf).await?;
        }
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;

        info!(
            path = %self.path.display(),
            keys = store.len(),
            folded_entries = folded,
            "snapshot written"
        );
        Ok(())
    }
}

/// Decodes one `[BulkString key, value]` snapshot row.
fn decode_pair(value: RespValue) -> Result<(String, RespValue), SnapshotError> {
    let arr = value
        .into_array()
        .ok_or_else(|| SnapshotError::Corrupt("expected array".to_string()))?;
    if arr.len() != 2 {
        return Err(SnapshotError::Corrupt(format!(
            "expected 2 elements, got {}",
            arr.len()
        )));
    }

    let mut fields = arr.into_iter();
    let (key_field, value) = match (fields.next(), fields.next()) {
        (Some(k), Some(v)) => (k, v),
        _ => return Err(SnapshotError::Corrupt("expected 2 elements".to_string())),
    };
    let key = match key_field.as_str() {
        Some(s) => s.to_string(),
        None => return Err(SnapshotError::Corrupt("expected bulk string key".to_string())),
    };
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::WalEntry;

    async fn wal_with_entries(path: &Path, entries: &[WalEntry]) -> Wal {
        let mut wal = Wal::open(path).await.unwrap();
        for entry in entries {
            wal.append(entry, true).await.unwrap();
        }
        wal
    }

    fn set(index: u64, key: &str, value: &str) -> WalEntry {
        WalEntry::new(
            index,
            OpKind::Set,
            key.to_string(),
            RespValue::bulk_string(Bytes::from(value.to_string())),
        )
    }

    fn delete(index: u64, key: &str) -> WalEntry {
        WalEntry::new(index, OpKind::Delete, key.to_string(), RespValue::Null)
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshotter::new(dir.path().join("snapshot.db"));
        let store = snap.load_snapshot().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_folds_rotated_wal() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshotter::new(dir.path().join("snapshot.db"));

        let mut wal = wal_with_entries(
            &dir.path().join("wal.log"),
            &[set(1, "a", "1"), set(2, "b", "2"), delete(3, "a")],
        )
        .await;

        snap.snapshot(&mut wal).await.unwrap();

        let store = snap.load_snapshot().await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("b"),
            Some(&RespValue::bulk_string(Bytes::from("2")))
        );
        assert!(!store.exists("a"));
    }

    #[tokio::test]
    async fn test_snapshot_layers_over_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshotter::new(dir.path().join("snapshot.db"));

        let mut first = wal_with_entries(
            &dir.path().join("wal1.log"),
            &[set(1, "a", "1"), set(2, "b", "2")],
        )
        .await;
        snap.snapshot(&mut first).await.unwrap();

        let mut second = wal_with_entries(
            &dir.path().join("wal2.log"),
            &[set(3, "b", "override"), set(4, "c", "3"), delete(5, "a")],
        )
        .await;
        snap.snapshot(&mut second).await.unwrap();

        let store = snap.load_snapshot().await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("b"),
            Some(&RespValue::bulk_string(Bytes::from("override")))
        );
        assert!(store.exists("c"));
        assert!(!store.exists("a"));
    }

    #[tokio::test]
    async fn test_snapshot_with_empty_wal_adds_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshotter::new(dir.path().join("snapshot.db"));

        let mut wal = wal_with_entries(
            &dir.path().join("wal.log"),
            &[set(1, "a", "1"), set(2, "b", "2")],
        )
        .await;
        snap.snapshot(&mut wal).await.unwrap();
        let first_len = std::fs::metadata(snap.path()).unwrap().len();

        let mut empty = Wal::open(dir.path().join("empty.log")).await.unwrap();
        snap.snapshot(&mut empty).await.unwrap();

        // Same pairs, same size: folding nothing duplicates nothing.
        let second_len = std::fs::metadata(snap.path()).unwrap().len();
        assert_eq!(first_len, second_len);
        let store = snap.load_snapshot().await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("a"),
            Some(&RespValue::bulk_string(Bytes::from("1")))
        );
    }

    #[tokio::test]
    async fn test_snapshot_preserves_typed_values() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshotter::new(dir.path().join("snapshot.db"));

        let nested = RespValue::array(vec![
            RespValue::Integer(7),
            RespValue::simple_string("seven"),
        ]);
        let mut wal = wal_with_entries(
            &dir.path().join("wal.log"),
            &[WalEntry::new(1, OpKind::Set, "k".into(), nested.clone())],
        )
        .await;
        snap.snapshot(&mut wal).await.unwrap();

        let store = snap.load_snapshot().await.unwrap();
        assert_eq!(store.get("k"), Some(&nested));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.db");
        std::fs::write(&path, b"*2\r\n$1\r\na\r\n:1\r\n*1\r\n$3\r\nbad\r\n").unwrap();

        let snap = Snapshotter::new(&path);
        assert!(matches!(
            snap.load_snapshot().await,
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_snapshot_leaves_image_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshotter::new(dir.path().join("snapshot.db"));

        let mut good = wal_with_entries(&dir.path().join("wal1.log"), &[set(1, "a", "1")]).await;
        snap.snapshot(&mut good).await.unwrap();
        let image = std::fs::read(snap.path()).unwrap();

        // A WAL with a torn trailing frame makes the fold fail.
        let bad_path = dir.path().join("wal2.log");
        {
            let mut wal = wal_with_entries(&bad_path, &[set(2, "b", "2")]).await;
            wal.append(&set(3, "c", "3"), true).await.unwrap();
            drop(wal);
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&bad_path)
                .unwrap();
            f.write_all(b"*6\r\n:4").unwrap();
        }
        let mut bad = Wal::open(&bad_path).await.unwrap();
        assert!(snap.snapshot(&mut bad).await.is_err());

        assert_eq!(std::fs::read(snap.path()).unwrap(), image);
    }
}
