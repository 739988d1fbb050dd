//! Elastic Worker Pool
//!
//! A bounded-queue pool that scales between a permanent floor and a
//! configured ceiling:
//!
//! - `base_workers` **permanent** workers are spawned at start and only exit
//!   when the pool stops.
//! - **Transient** workers are spawned on queue pressure and retire after
//!   sitting idle for `worker_ttl`.
//!
//! `put` never blocks the caller: a full queue is an immediate rejection.
//! The spawn heuristic (`queued > active * idle_per_worker`) reads relaxed
//! counters and is deliberately racy; an occasional extra transient retires
//! on its own, which is cheaper than a CAS loop on the enqueue path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, trace};

/// Errors returned by [`WorkerPool::put`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pending queue is at capacity.
    #[error("pool full")]
    Full,

    /// The pool has been stopped.
    #[error("pool stopped")]
    Stopped,
}

/// Processes items handed out by the pool.
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(&self, item: T) -> anyhow::Result<()>;
}

/// Sizing and behavior knobs for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on concurrently live workers.
    pub max_workers: usize,
    /// Capacity of the pending queue.
    pub pending_capacity: usize,
    /// Queue-pressure ratio before a transient worker is spawned.
    pub idle_per_worker: usize,
    /// Idle time before a transient worker retires.
    pub worker_ttl: Duration,
    /// Permanent workers spawned at start.
    pub base_workers: usize,
    /// Log processing errors at DEBUG instead of ERROR.
    pub fail_silently: bool,
}

/// An elastic pool of async workers draining a bounded queue.
pub struct WorkerPool<T> {
    cfg: PoolConfig,
    tx: StdMutex<Option<mpsc::Sender<T>>>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    handler: Arc<dyn Handler<T>>,
    active_workers: Arc<AtomicI64>,
    queued: Arc<AtomicI64>,
    next_worker_id: AtomicU64,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(cfg: PoolConfig, handler: Arc<dyn Handler<T>>) -> Self {
        let (tx, rx) = mpsc::channel(cfg.pending_capacity.max(1));
        Self {
            cfg,
            tx: StdMutex::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
            handler,
            active_workers: Arc::new(AtomicI64::new(0)),
            queued: Arc::new(AtomicI64::new(0)),
            next_worker_id: AtomicU64::new(1),
        }
    }

    /// Spawns the permanent workers. Must run inside a tokio runtime.
    pub fn start(&self) {
        for _ in 0..self.cfg.base_workers {
            self.spawn_worker(true);
        }
    }

    /// Stops the pool by closing the queue.
    ///
    /// Workers finish their current item, drain what is already queued, and
    /// exit on end-of-stream. Idempotent and safe to race with `put` (late
    /// callers get [`PoolError::Stopped`]).
    pub fn stop(&self) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("worker pool stopping");
        }
    }

    /// Enqueues an item without blocking.
    ///
    /// On success, the elasticity heuristic may spawn one transient worker.
    /// A full queue rejects the item (it is dropped, which for a connection
    /// closes the socket).
    pub fn put(&self, item: T) -> Result<(), PoolError> {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Stopped)?;

        match sender.try_send(item) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                self.maybe_spawn_transient();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(PoolError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::Stopped),
        }
    }

    /// Current number of live workers.
    pub fn active_workers(&self) -> i64 {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Current number of queued items.
    pub fn queue_len(&self) -> i64 {
        self.queued.load(Ordering::Relaxed).max(0)
    }

    /// Advisory elasticity check; relaxed reads are enough because an
    /// over-spawned transient self-retires after its TTL.
    fn maybe_spawn_transient(&self) {
        let active = self.active_workers.load(Ordering::Relaxed);
        let pending = self.queued.load(Ordering::Relaxed);
        if active < self.cfg.max_workers as i64
            && pending > active * self.cfg.idle_per_worker as i64
        {
            self.spawn_worker(false);
        }
    }

    fn spawn_worker(&self, permanent: bool) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let active = self.active_workers.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(worker_id, permanent, active, "spawning worker");

        let rx = Arc::clone(&self.rx);
        let handler = Arc::clone(&self.handler);
        let active_workers = Arc::clone(&self.active_workers);
        let queued = Arc::clone(&self.queued);
        let ttl = self.cfg.worker_ttl;
        let fail_silently = self.cfg.fail_silently;

        tokio::spawn(async move {
            loop {
                let item = if permanent {
                    // Permanent workers wait for work indefinitely.
                    let mut rx = rx.lock().await;
                    rx.recv().await
                } else {
                    // Transient workers give up after sitting idle.
                    let recv = async {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match tokio::time::timeout(ttl, recv).await {
                        Ok(item) => item,
                        Err(_) => {
                            debug!(worker_id, "transient worker timed out");
                            active_workers.fetch_sub(1, Ordering::Relaxed);
                            return;
                        }
                    }
                };

                let Some(item) = item else {
                    // Queue closed and drained.
                    debug!(worker_id, permanent, "worker stopping");
                    if !permanent {
                        active_workers.fetch_sub(1, Ordering::Relaxed);
                    }
                    return;
                };

                queued.fetch_sub(1, Ordering::Relaxed);
                trace!(worker_id, "worker processing item");
                if let Err(err) = handler.handle(item).await {
                    if fail_silently {
                        debug!(worker_id, error = %err, "processing error (ignored)");
                    } else {
                        error!(worker_id, error = %err, "processing error in worker");
                    }
                }
            }
        });
    }
}
