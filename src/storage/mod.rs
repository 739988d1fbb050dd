//! Durable Storage Module
//!
//! This module provides the persistence core behind the server:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      StorageService                          │
//! │                    (reader/writer lock)                      │
//! │                                                              │
//! │   ┌────────────┐    ┌──────────────┐    ┌───────────────┐   │
//! │   │ MemoryStore│    │     Wal      │    │  Snapshotter  │   │
//! │   │  (HashMap) │    │ append+fsync │    │ fold + rename │   │
//! │   └────────────┘    │ replay/rotate│    └───────────────┘   │
//! │                     └──────────────┘                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations append to the WAL (fsynced) before touching the store; the
//! snapshot engine periodically folds a rotated WAL into the on-disk image
//! so the log stays short. Startup is `load snapshot`, then `replay WAL`.

pub mod service;
pub mod snapshot;
pub mod store;
pub mod wal;

// Re-export commonly used types
pub use service::{StorageError, StorageService};
pub use snapshot::{SnapshotError, Snapshotter};
pub use store::MemoryStore;
pub use wal::{Wal, WalEntry, WalError};
