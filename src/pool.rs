//! The pool itself (§4.4): shards checkout across partitions, coordinates
//! growth, eviction and shutdown, and owns the extension hook.
mod worker;

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::handle::{Connection, ConnectionHandle};
use crate::hooks::{AcquireFailConfig, ConnectionHook, NopHook};
use crate::partition::PartitionShared;
use crate::raw::StatementOptions;
use crate::stats::{Statistics, StatisticsSnapshot};

/// Shared pool state, `Arc`-held by the public [`Pool`] handle and weakly
/// back-referenced from every [`ConnectionHandle`] via its partition.
pub(crate) struct PoolShared {
    pub(crate) config: Arc<PoolConfig>,
    pub(crate) partitions: Vec<Arc<PartitionShared>>,
    pub(crate) stats: Arc<Statistics>,
    hook: RwLock<Arc<dyn ConnectionHook>>,
    pub(crate) release_tx: mpsc::UnboundedSender<ConnectionHandle>,
    release_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnectionHandle>>,
    down: AtomicBool,
    shutting_down: AtomicBool,
    next_handle_id: AtomicU64,
    next_partition: AtomicUsize,
    self_weak: Weak<PoolShared>,
}

impl PoolShared {
    pub(crate) fn hook(&self) -> Arc<dyn ConnectionHook> {
        Arc::clone(&self.hook.read().expect("connection hook lock poisoned"))
    }

    pub(crate) fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Escalate to a full pool-wide termination. Called from a handle's
    /// failure classifier on `DATABASE_DOWN`; spawns the drain-and-reprovision
    /// sequence rather than running it inline, since the caller is mid-way
    /// through reporting an unrelated error back to its own client.
    pub(crate) fn trigger_terminate_all(&self) {
        if self.down.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("database appears to be down; terminating all connections");
        if let Some(pool) = self.self_weak.upgrade() {
            crate::rt::spawn_detached(async move {
                pool.drain_and_retire_all().await;
                pool.reprovision_all().await;
                pool.down.store(false, Ordering::Release);
            });
        }
    }

    async fn drain_and_retire_all(&self) {
        for partition in &self.partitions {
            for mut handle in partition.drain_free() {
                self.hook().on_destroy(&handle);
                handle.internal_close().await;
                partition.record_retirement();
            }
        }
    }

    async fn reprovision_all(self: &Arc<Self>) {
        for partition in &self.partitions {
            while partition.total() < partition.min && !self.is_shutting_down() {
                match self.acquire_one(partition).await {
                    Some(handle) => {
                        partition.record_new_connection();
                        if partition.push_free(handle).is_err() {
                            warn!(
                                "partition {} free queue full while reprovisioning to its minimum",
                                partition.index
                            );
                            break;
                        }
                        partition.signal_growth();
                    }
                    None => {
                        partition.set_unable_to_grow(true);
                        break;
                    }
                }
            }
        }
    }

    /// Obtain one new physical connection, running the configured init SQL
    /// and retrying per the configured acquisition policy (`-1` = infinite).
    async fn acquire_one(self: &Arc<Self>, partition: &Arc<PartitionShared>) -> Option<ConnectionHandle> {
        let mut remaining = self.config.acquire_retry_attempts;
        loop {
            match (self.config.connect)().await {
                Ok(raw) => {
                    let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
                    let mut handle = ConnectionHandle::new(
                        id,
                        raw,
                        Arc::clone(partition),
                        self.config.statements_cache_size,
                    );
                    if let Some(sql) = &self.config.init_sql {
                        if let Ok((_key, mut stmt, _hit)) =
                            handle.prepare(sql, StatementOptions::default(), false).await
                        {
                            if self.config.log_statements_enabled {
                                debug!("executing statement: {sql}");
                            }
                            if let Err(err) = stmt.execute(&[]).await {
                                warn!("init SQL failed on new connection {id}: {err}");
                            }
                            if let Err(err) = stmt.close().await {
                                warn!("error closing init SQL statement on connection {id}: {err}");
                            }
                        }
                    }
                    self.hook().on_acquire(&handle);
                    return Some(handle);
                }
                Err(err) => {
                    let retry = self.hook().on_acquire_fail(
                        &err,
                        AcquireFailConfig { attempts_left: remaining, retry_delay: self.config.acquire_retry_delay },
                    );
                    if !retry || remaining == 0 {
                        return None;
                    }
                    if remaining > 0 {
                        remaining -= 1;
                    }
                    crate::rt::sleep(self.config.acquire_retry_delay).await;
                }
            }
        }
    }

    /// Thread/task-affinity partition selection (§4.4 step 1). Hashes the
    /// current Tokio task id when one is available; falls back to a plain
    /// round-robin counter (e.g. outside of a task, or with the `tokio`
    /// feature disabled), which still spreads load evenly even though it
    /// loses the "same task keeps hitting the same partition" locality.
    fn select_partition(&self) -> usize {
        let n = self.partitions.len();
        if n <= 1 {
            return 0;
        }

        #[cfg(feature = "tokio")]
        if let Some(id) = tokio::task::try_id() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            id.hash(&mut hasher);
            return (hasher.finish() as usize) % n;
        }

        self.next_partition.fetch_add(1, Ordering::Relaxed) % n
    }

    /// Return (or retire) a handle coming off the release queue.
    async fn internal_release(&self, mut handle: ConnectionHandle) {
        self.hook().on_check_in(&handle);

        let should_retire =
            self.is_down() || handle.possibly_broken() || handle.is_expired(self.config.max_connection_age);

        if should_retire {
            let partition = Arc::clone(&handle.partition);
            handle.internal_close().await;
            partition.record_retirement();
            partition.signal_growth();
            return;
        }

        let partition = Arc::clone(&handle.partition);
        if let Err(mut handle) = partition.push_free(handle) {
            warn!("partition {} free queue unexpectedly full on release; retiring instead", partition.index);
            handle.internal_close().await;
            partition.record_retirement();
        }
    }
}

/// A partitioned, asynchronous connection pool.
pub struct Pool {
    shared: Arc<PoolShared>,
    workers: Vec<crate::rt::JoinHandle<()>>,
}

impl Pool {
    /// Build a pool from `config`, filling every partition to its configured
    /// minimum before returning, and start its background maintenance workers.
    pub async fn connect(config: PoolConfig) -> Result<Pool> {
        let config = Arc::new(config);
        let stats = Arc::new(Statistics::default());
        let (release_tx, release_rx) = mpsc::unbounded_channel();

        let shared = Arc::new_cyclic(|weak: &Weak<PoolShared>| {
            let partitions = (0..config.partition_count)
                .map(|i| {
                    PartitionShared::new(
                        i,
                        config.min_connections_per_partition,
                        config.max_connections_per_partition,
                        config.acquire_increment,
                        Arc::clone(&stats),
                        weak.clone(),
                    )
                })
                .collect();

            PoolShared {
                config: Arc::clone(&config),
                partitions,
                stats: Arc::clone(&stats),
                hook: RwLock::new(Arc::new(NopHook)),
                release_tx,
                release_rx: tokio::sync::Mutex::new(release_rx),
                down: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                next_handle_id: AtomicU64::new(0),
                next_partition: AtomicUsize::new(0),
                self_weak: weak.clone(),
            }
        });

        shared.reprovision_all().await;

        let mut workers = Vec::new();
        for _ in 0..config.release_worker_count {
            workers.push(worker::spawn_release_worker(Arc::clone(&shared)));
        }
        for partition in &shared.partitions {
            workers.push(worker::spawn_growth_worker(Arc::clone(&shared), Arc::clone(partition)));
            if let Some(period) = config.idle_connection_test_period {
                workers.push(worker::spawn_keepalive_worker(Arc::clone(&shared), Arc::clone(partition), period));
            }
        }

        Ok(Pool { shared, workers })
    }

    /// `getConnection()`.
    pub async fn acquire(&self) -> Result<Connection> {
        if self.shared.is_shutting_down() {
            return Err(Error::ShutdownInProgress);
        }

        let idx = self.shared.select_partition();
        let partition = &self.shared.partitions[idx];
        let started = Instant::now();

        let mut handle = match partition.try_checkout() {
            Some(handle) => handle,
            None => {
                if partition.needs_growth() {
                    partition.signal_growth();
                }
                let wait = crate::rt::timeout(self.shared.config.connection_timeout, async {
                    loop {
                        if let Some(handle) = partition.try_checkout() {
                            return handle;
                        }
                        partition.wait_for_growth_signal().await;
                    }
                })
                .await;

                match wait {
                    Ok(handle) => handle,
                    Err(_) => return Err(Error::AcquisitionTimedOut(self.shared.config.connection_timeout)),
                }
            }
        };

        handle.renew();
        if self.shared.config.statistics_enabled {
            self.shared.stats.record_acquire(started.elapsed().as_nanos() as u64);
        }
        self.shared.hook().on_check_out(&handle);

        Ok(Connection::new(
            handle,
            self.shared.config.close_connection_watch,
            self.shared.config.disable_connection_tracking,
        ))
    }

    /// Drain and retire every connection, then reprovision every partition
    /// back to its configured minimum before returning.
    pub async fn terminate_all_connections(&self) {
        self.shared.down.store(true, Ordering::Release);
        self.shared.drain_and_retire_all().await;
        self.shared.reprovision_all().await;
        self.shared.down.store(false, Ordering::Release);
    }

    /// `shutdown()`: stop accepting new checkouts and retire every idle
    /// connection. Already-checked-out connections are retired as they are
    /// released, since `is_shutting_down` alone does not forcibly recall them.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.shared.drain_and_retire_all().await;
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn set_connection_hook(&self, hook: Arc<dyn ConnectionHook>) {
        *self.shared.hook.write().expect("connection hook lock poisoned") = hook;
    }

    pub fn max_connections(&self) -> usize {
        self.shared.config.max_connections()
    }
}

impl Drop for Pool {
    /// Flips the cooperative shutdown flag so every background worker exits
    /// at its next wakeup. This is a best-effort nudge, not a join: dropping
    /// a `tokio::task::JoinHandle` does not cancel the task it points to, and
    /// a synchronous `Drop` has no way to `.await` their actual exit. Callers
    /// that need a fully drained shutdown should call [`Pool::shutdown`]
    /// before dropping the pool.
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.workers.clear();
    }
}
