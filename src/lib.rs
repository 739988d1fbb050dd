//! # DuraKV - A Durable, Redis-Compatible Key-Value Server
//!
//! DuraKV is a single-node key/value server speaking RESP2, built around a
//! durability core: every acknowledged write is fsynced to a write-ahead log
//! before the client sees `+OK`, and a snapshot engine periodically folds
//! the log into an atomic on-disk image so restarts replay only a short
//! tail.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            DuraKV                               │
//! │                                                                 │
//! │  ┌────────────┐   ┌──────────────┐   ┌─────────────────────┐   │
//! │  │ TcpManager │──▶│  WorkerPool  │──▶│    RedisHandler     │   │
//! │  │ (acceptor) │   │(bounded queue│   │ parse ▸ execute ▸   │   │
//! │  └────────────┘   │  + elastic   │   │ respond, per conn   │   │
//! │                   │   workers)   │   └──────────┬──────────┘   │
//! │                   └──────────────┘              │              │
//! │                                                 ▼              │
//! │  ┌──────────────┐   ┌───────────────────────────────────────┐  │
//! │  │ RESP2 codec  │   │            StorageService             │  │
//! │  │ (wire + disk │   │ RwLock ▸ WAL append+fsync ▸ store     │  │
//! │  │   framing)   │   │ snapshot on size/time thresholds      │  │
//! │  └──────────────┘   └───────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! 1. A mutation is appended to the WAL and fsynced before the in-memory
//!    store changes; only then is the client acknowledged.
//! 2. The WAL rotates atomically (rename + fresh file); the rotated file is
//!    folded into the snapshot and the snapshot is replaced with a single
//!    rename, so readers never observe a torn image.
//! 3. Startup loads the snapshot and replays the WAL tail (both SET and
//!    DELETE entries), reproducing exactly the state clients last observed.
//!
//! ## Supported Commands
//!
//! - `GET key`
//! - `SET key value`
//! - `DELETE key`
//! - `PING`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP2 parser/serializer and typed operations
//! - [`storage`]: in-memory store, WAL, snapshot engine, storage service
//! - [`server`]: TCP acceptor, elastic worker pool, connection handler
//! - [`config`]: YAML configuration with defaults

pub mod config;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::Config;
pub use protocol::{Op, OpKind, ParseError, RespParser, RespValue};
pub use server::{RedisHandler, TcpManager, WorkerPool};
pub use storage::{StorageService, Wal, WalEntry};

/// Version of DuraKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
