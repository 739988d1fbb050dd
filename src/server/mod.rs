//! TCP Server Module
//!
//! The accept loop, the elastic worker pool, and the per-connection handler:
//!
//! ```text
//! accept ──▶ bounded queue ──▶ worker ──▶ RedisHandler::serve
//!    │            │
//!    │            └─ full: close connection, count a rejection
//!    └─ stamp metrics
//! ```
//!
//! - [`pool`]: the elastic worker pool
//! - [`handler`]: the per-connection RESP2 request loop
//!
//! The manager itself only accepts, counts, and enqueues; all protocol work
//! happens on pool workers.

pub mod handler;
pub mod pool;

pub use handler::{ClientConn, ConnectionError, RedisHandler};
pub use pool::{Handler, PoolConfig, PoolError, WorkerPool};

use crate::config::RedisConfig;
use crate::storage::StorageService;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Atomic counters exposed for introspection and health checks.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub total_accepted: AtomicI64,
    pub rejected: AtomicI64,
    pub in_flight: AtomicI64,
    pub on_message_errors: AtomicI64,
    pub healthy: AtomicBool,
}

/// A point-in-time view of the server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_accepted: i64,
    pub rejected: i64,
    pub in_flight: i64,
    pub on_message_errors: i64,
    pub queue_size: i64,
    pub active_workers: i64,
    pub healthy: bool,
}

/// Bridges pool workers to the connection handler, keeping the in-flight and
/// error counters honest.
struct ConnDispatcher {
    handler: RedisHandler,
    metrics: Arc<ServerMetrics>,
}

#[async_trait]
impl Handler<ClientConn> for ConnDispatcher {
    async fn handle(&self, conn: ClientConn) -> anyhow::Result<()> {
        self.metrics.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.handler.serve(conn).await;
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);

        if let Err(e) = result {
            self.metrics.on_message_errors.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Accepts TCP connections and feeds them to the worker pool.
pub struct TcpManager {
    bind_addr: String,
    pool: WorkerPool<ClientConn>,
    metrics: Arc<ServerMetrics>,
}

impl TcpManager {
    pub fn new(storage: Arc<StorageService>, cfg: &RedisConfig) -> Self {
        let metrics = Arc::new(ServerMetrics::default());
        let dispatcher: Arc<dyn Handler<ClientConn>> = Arc::new(ConnDispatcher {
            handler: RedisHandler::new(storage, cfg),
            metrics: Arc::clone(&metrics),
        });

        let pool = WorkerPool::new(
            PoolConfig {
                max_workers: cfg.max_connections,
                pending_capacity: cfg.max_pending,
                idle_per_worker: cfg.idle_connections_per_worker,
                worker_ttl: Duration::from_secs(cfg.worker_ttl),
                base_workers: cfg.base_workers,
                fail_silently: false,
            },
            dispatcher,
        );

        Self {
            bind_addr: format!("{}:{}", cfg.host, cfg.port),
            pool,
            metrics,
        }
    }

    /// Binds the listening socket.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(addr = %self.bind_addr, "listening");
        Ok(listener)
    }

    /// Runs the accept loop until the task is cancelled.
    ///
    /// Every accepted connection is counted and enqueued; a full queue
    /// closes the connection immediately without blocking the acceptor.
    pub async fn run(&self, listener: TcpListener) {
        self.pool.start();
        self.metrics.healthy.store(true, Ordering::Relaxed);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    self.metrics.total_accepted.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.pool.put(ClientConn { stream, addr }) {
                        // The rejected connection was dropped, which closes it.
                        self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(client = %addr, error = %e, "connection rejected");
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    /// Stops the pool; in-flight connections finish, queued ones drain.
    pub fn stop(&self) {
        self.metrics.healthy.store(false, Ordering::Relaxed);
        self.pool.stop();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_accepted: self.metrics.total_accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            in_flight: self.metrics.in_flight.load(Ordering::Relaxed),
            on_message_errors: self.metrics.on_message_errors.load(Ordering::Relaxed),
            queue_size: self.pool.queue_len(),
            active_workers: self.pool.active_workers(),
            healthy: self.metrics.healthy.load(Ordering::Relaxed),
        }
    }
}
