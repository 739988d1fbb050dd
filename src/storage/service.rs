//! Storage Service
//!
//! Owns the live WAL, the snapshot engine and the in-memory store, and
//! linearizes every mutation under a single reader/writer lock:
//!
//! ```text
//!            ┌───────────────── RwLock ─────────────────┐
//!  get ──────▶ shared:    store.get                      │
//!  set ──────▶ exclusive: wal.append(sync) ─▶ store.set  │
//!  delete ───▶ exclusive: wal.append(sync) ─▶ store.del  │
//!            └──────────────────────────────────────────┘
//! ```
//!
//! The WAL append (with fsync) happens strictly before the store mutation,
//! so an acknowledged write is durable before the client sees the reply.
//! Snapshots are triggered by WAL size or elapsed time after mutations.

use crate::config::{SnapshotConfig, WalConfig};
use crate::protocol::{OpKind, RespValue};
use crate::storage::snapshot::{Snapshotter, SnapshotError};
use crate::storage::store::MemoryStore;
use crate::storage::wal::{Wal, WalEntry, WalError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors surfaced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// State guarded by the storage lock.
struct Inner {
    wal: Wal,
    store: MemoryStore,
    next_index: u64,
    last_snapshot: Instant,
}

/// The durable key/value service.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct StorageService {
    inner: RwLock<Inner>,
    snapshotter: Snapshotter,
    snapshot_threshold: u64,
    snapshot_interval: Duration,
}

impl StorageService {
    /// Opens the service: loads the snapshot, replays the WAL on top of it,
    /// and resumes the entry index sequence.
    ///
    /// Both SET and DELETE entries are applied during replay, so deletions
    /// acknowledged before a crash stay deleted after restart.
    pub async fn open(
        snapshot_cfg: &SnapshotConfig,
        wal_cfg: &WalConfig,
    ) -> Result<Self, StorageError> {
        let snapshotter = Snapshotter::new(&snapshot_cfg.path);
        let mut wal = Wal::open(&wal_cfg.path).await?;

        let mut store = snapshotter.load_snapshot().await?;
        let entries = wal.replay().await?;
        let replayed = entries.len();

        let mut next_index = 1;
        for entry in entries {
            next_index = next_index.max(entry.index + 1);
            match entry.op {
                OpKind::Set => store.set(entry.key, entry.value),
                OpKind::Delete => store.delete(&entry.key),
                OpKind::Get | OpKind::Ping => {}
            }
        }

        info!(
            keys = store.len(),
            replayed_entries = replayed,
            wal_bytes = wal.size(),
            "storage service opened"
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                wal,
                store,
                next_index,
                last_snapshot: Instant::now(),
            }),
            snapshotter,
            snapshot_threshold: snapshot_cfg.threshold,
            snapshot_interval: Duration::from_secs(snapshot_cfg.interval),
        })
    }

    /// Looks up a key; a miss yields the null bulk string.
    pub async fn get(&self, key: &str) -> RespValue {
        let inner = self.inner.read().await;
        inner.store.get(key).cloned().unwrap_or(RespValue::Null)
    }

    /// Returns whether a key is present.
    pub async fn exists(&self, key: &str) -> bool {
        let inner = self.inner.read().await;
        inner.store.exists(key)
    }

    /// Durably sets a key.
    ///
    /// The WAL entry is appended and fsynced before the in-memory store is
    /// touched; if the append fails, the store is left unchanged.
    pub async fn set(&self, key: String, value: RespValue) -> Result<(), StorageError> {
        {
            let mut inner = self.inner.write().await;
            let entry = WalEntry::new(inner.next_index, OpKind::Set, key.clone(), value.clone());
            inner.wal.append(&entry, true).await?;
            inner.next_index += 1;
            inner.store.set(key, value);
        }
        self.maybe_snapshot().await;
        Ok(())
    }

    /// Durably deletes a key. The WAL entry carries a null placeholder in
    /// the value slot.
    pub async fn delete(&self, key: String) -> Result<(), StorageError> {
        {
            let mut inner = self.inner.write().await;
            let entry = WalEntry::new(inner.next_index, OpKind::Delete, key.clone(), RespValue::Null);
            inner.wal.append(&entry, true).await?;
            inner.next_index += 1;
            inner.store.delete(&key);
        }
        self.maybe_snapshot().await;
        Ok(())
    }

    /// Current size of the live WAL in bytes.
    pub async fn wal_size(&self) -> u64 {
        self.inner.read().await.wal.size()
    }

    /// Rotates the WAL and folds the rotated file into the snapshot.
    ///
    /// The exclusive lock is held for the whole operation, so no mutator can
    /// slip an entry between the rotation and the fold.
    pub async fn snapshot(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let mut rotated = inner.wal.rotate().await?;

        let result = self.snapshotter.snapshot(&mut rotated).await;
        let rotated_path = rotated.path().to_path_buf();
        rotated.close().await?;
        result?;

        // The folded history lives in the snapshot now.
        if let Err(e) = tokio::fs::remove_file(&rotated_path).await {
            warn!(path = %rotated_path.display(), error = %e, "failed to remove rotated WAL");
        }

        inner.last_snapshot = Instant::now();
        Ok(())
    }

    /// Takes a snapshot when the WAL has outgrown the configured threshold
    /// or the configured interval has elapsed. Both triggers reset the
    /// snapshot timer.
    pub async fn snapshot_if_needed(&self) -> Result<bool, StorageError> {
        let due = {
            let inner = self.inner.read().await;
            inner.wal.size() >= self.snapshot_threshold
                || inner.last_snapshot.elapsed() >= self.snapshot_interval
        };
        if !due {
            return Ok(false);
        }

        debug!("snapshot triggered");
        self.snapshot().await?;
        Ok(true)
    }

    /// Post-mutation snapshot check. Failures are logged, not propagated:
    /// the mutation itself is already durable in the WAL.
    async fn maybe_snapshot(&self) {
        if let Err(e) = self.snapshot_if_needed().await {
            warn!(error = %e, "snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn configs(dir: &std::path::Path) -> (SnapshotConfig, WalConfig) {
        (
            SnapshotConfig {
                path: dir.join("snapshot.db").to_string_lossy().into_owned(),
                interval: 3600,
                threshold: 1024 * 1024,
            },
            WalConfig {
                path: dir.join("wal.log").to_string_lossy().into_owned(),
            },
        )
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    #[tokio::test]
    async fn test_set_get_delete_exists() {
        let dir = tempfile::tempdir().unwrap();
        let (snap_cfg, wal_cfg) = configs(dir.path());
        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();

        assert_eq!(service.get("k").await, RespValue::Null);

        service.set("k".into(), bulk("v")).await.unwrap();
        assert_eq!(service.get("k").await, bulk("v"));
        assert!(service.exists("k").await);

        service.delete("k".into()).await.unwrap();
        assert_eq!(service.get("k").await, RespValue::Null);
        assert!(!service.exists("k").await);
    }

    #[tokio::test]
    async fn test_restart_replays_sets_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let (snap_cfg, wal_cfg) = configs(dir.path());

        {
            let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
            service.set("a".into(), bulk("1")).await.unwrap();
            service.set("b".into(), bulk("2")).await.unwrap();
            service.delete("a".into()).await.unwrap();
            // Dropped without any orderly shutdown, as a crash would be.
        }

        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
        assert_eq!(service.get("a").await, RespValue::Null);
        assert_eq!(service.get("b").await, bulk("2"));
    }

    #[tokio::test]
    async fn test_restart_resumes_index_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let (snap_cfg, wal_cfg) = configs(dir.path());

        {
            let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
            service.set("a".into(), bulk("1")).await.unwrap();
            service.set("b".into(), bulk("2")).await.unwrap();
        }
        {
            let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
            service.set("c".into(), bulk("3")).await.unwrap();
        }

        let mut wal = Wal::open(&wal_cfg.path).await.unwrap();
        let entries = wal.replay().await.unwrap();
        let indexes: Vec<u64> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_snapshot_compacts_wal_and_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let (snap_cfg, wal_cfg) = configs(dir.path());

        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
        service.set("a".into(), bulk("1")).await.unwrap();
        service.set("b".into(), bulk("2")).await.unwrap();
        service.delete("a".into()).await.unwrap();

        service.snapshot().await.unwrap();
        assert_eq!(service.wal_size().await, 0);

        // State survives through the snapshot alone.
        drop(service);
        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
        assert_eq!(service.get("a").await, RespValue::Null);
        assert_eq!(service.get("b").await, bulk("2"));
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (mut snap_cfg, wal_cfg) = configs(dir.path());
        snap_cfg.threshold = 1; // every mutation crosses it

        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
        service.set("a".into(), bulk("1")).await.unwrap();

        // The mutation itself tripped the size trigger.
        assert_eq!(service.wal_size().await, 0);
        let snap = Snapshotter::new(&snap_cfg.path);
        let store = snap.load_snapshot().await.unwrap();
        assert_eq!(store.get("a"), Some(&bulk("1")));
    }

    #[tokio::test]
    async fn test_snapshot_if_needed_is_quiet_below_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let (snap_cfg, wal_cfg) = configs(dir.path());

        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
        service.set("a".into(), bulk("1")).await.unwrap();

        assert!(!service.snapshot_if_needed().await.unwrap());
        assert!(service.wal_size().await > 0);
        assert!(!std::path::Path::new(&snap_cfg.path).exists());
    }

    #[tokio::test]
    async fn test_values_survive_typed() {
        let dir = tempfile::tempdir().unwrap();
        let (snap_cfg, wal_cfg) = configs(dir.path());

        let nested = RespValue::array(vec![RespValue::Integer(1), bulk("x")]);
        {
            let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
            service.set("n".into(), nested.clone()).await.unwrap();
            service.set("i".into(), RespValue::Integer(-7)).await.unwrap();
        }

        let service = StorageService::open(&snap_cfg, &wal_cfg).await.unwrap();
        assert_eq!(service.get("n").await, nested);
        assert_eq!(service.get("i").await, RespValue::Integer(-7));
    }
}
