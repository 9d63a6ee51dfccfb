//! The logical connection handle (§3 ConnectionHandle, §4.1), the component
//! that intercepts every client operation to cache statements, classify
//! failures, and enforce single-use/closed-handle semantics.
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::cache::StatementCache;
use crate::classify::{classify, Classification, ConnectionState};
use crate::error::{Error, Result};
use crate::partition::PartitionShared;
use crate::raw::{
    Holdability, IsolationLevel, RawConnection, RawStatement, StatementKey, StatementOptions,
    StatementParam,
};
use crate::replay::{ReplayLog, ReplayedOp, Replayer, TransactionRecoveryResult};

/// A logical wrapper around one raw physical connection.
///
/// Owned by exactly one side at a time — a partition's free queue, a
/// [`Connection`] checked out by a client, or mid-retirement inside a
/// maintenance worker — which is enforced structurally: `ConnectionHandle`
/// has no `Clone`, so the type system rules out handing the same physical
/// connection to two callers at once.
pub struct ConnectionHandle {
    id: u64,
    raw: Box<dyn RawConnection>,
    pub(crate) partition: Arc<PartitionShared>,
    created_at: Instant,
    last_used_at: Instant,
    last_reset_at: Instant,
    possibly_broken: bool,
    logically_closed: bool,
    in_replay_mode: bool,
    stmt_cache: StatementCache,
    callable_cache: StatementCache,
    replay_log: ReplayLog,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("possibly_broken", &self.possibly_broken)
            .field("logically_closed", &self.logically_closed)
            .finish()
    }
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: u64,
        raw: Box<dyn RawConnection>,
        partition: Arc<PartitionShared>,
        stmt_cache_capacity: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            raw,
            partition,
            created_at: now,
            last_used_at: now,
            last_reset_at: now,
            possibly_broken: false,
            logically_closed: false,
            in_replay_mode: false,
            stmt_cache: StatementCache::new(stmt_cache_capacity),
            callable_cache: StatementCache::new(stmt_cache_capacity),
            replay_log: ReplayLog::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn possibly_broken(&self) -> bool {
        self.possibly_broken
    }

    pub(crate) fn mark_possibly_broken(&mut self) {
        self.possibly_broken = true;
    }

    /// `isExpired(t)`: `maxAge > 0 && t - creationTime > maxAge`.
    pub(crate) fn is_expired(&self, max_connection_age: Option<Duration>) -> bool {
        max_connection_age.is_some_and(|max| !max.is_zero() && self.created_at.elapsed() > max)
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub(crate) fn since_last_reset(&self) -> Duration {
        self.last_reset_at.elapsed()
    }

    pub(crate) fn mark_reset(&mut self) {
        self.last_reset_at = Instant::now();
    }

    /// Called by the pool at checkout to reset idle bookkeeping.
    pub(crate) fn renew(&mut self) {
        self.logically_closed = false;
        self.last_used_at = Instant::now();
    }

    /// Keep-alive probe delegated to the raw connection's own validity check.
    pub(crate) async fn probe_alive(&mut self, timeout: Duration) -> bool {
        match self.raw.is_valid(timeout).await {
            Ok(alive) => alive,
            Err(err) => {
                debug!("keep-alive probe failed on connection {}: {err}", self.id);
                false
            }
        }
    }

    /// Physically retire this connection. Clears both statement caches
    /// (closing every cached statement), then closes the raw connection.
    pub(crate) async fn internal_close(&mut self) {
        let cached = self.stmt_cache.drain().into_iter().chain(self.callable_cache.drain());
        for mut stmt in cached {
            if let Err(err) = stmt.close().await {
                warn!("error closing cached statement on retirement of connection {}: {err}", self.id);
            }
        }
        if let Err(err) = self.raw.close().await {
            warn!("error closing connection {}: {err}", self.id);
        }
        self.logically_closed = true;
        trace!("connection {} retired", self.id);
    }

    fn should_record(&self) -> bool {
        !self.in_replay_mode
            && self.partition.pool().is_some_and(|pool| pool.config.transaction_recovery_enabled)
    }

    fn record(&mut self, op: ReplayedOp) {
        if self.should_record() {
            self.replay_log.record(op);
        }
    }

    pub(crate) fn replay_log(&self) -> &ReplayLog {
        &self.replay_log
    }

    pub(crate) fn clear_replay_log(&mut self) {
        self.replay_log.clear();
    }

    pub(crate) fn set_in_replay_mode(&mut self, v: bool) {
        self.in_replay_mode = v;
    }

    /// Transaction recovery (§4.2): obtain a fresh physical connection and
    /// replay the recorded operations of the current transaction onto it.
    ///
    /// Exposed as an explicit call rather than run silently inside
    /// [`ConnectionHandle::classify_and_wrap`]: re-dispatching the exact
    /// operation that originally failed onto the replayed statement set is a
    /// client-level concern once recovery has repopulated
    /// [`TransactionRecoveryResult`] — see DESIGN.md.
    pub(crate) async fn recover(&mut self) -> Result<TransactionRecoveryResult> {
        let pool = self.partition.pool().ok_or(Error::ShutdownInProgress)?;
        if !pool.config.transaction_recovery_enabled {
            return Err(Error::Configuration("transaction recovery is not enabled".into()));
        }
        if self.replay_log.is_empty() {
            return Ok(TransactionRecoveryResult::default());
        }

        let mut new_raw = (pool.config.connect)()
            .await
            .map_err(Error::AcquisitionFailed)?;

        self.in_replay_mode = true;
        let replayed = Replayer::replay(&self.replay_log, &mut *new_raw).await;
        self.in_replay_mode = false;

        match replayed {
            Ok(recovery) => {
                if let Err(err) = self.raw.close().await {
                    warn!("error closing connection {} after successful recovery: {err}", self.id);
                }
                self.raw = new_raw;
                self.possibly_broken = false;
                debug!("connection {} recovered via transaction replay", self.id);
                Ok(recovery)
            }
            Err(err) => {
                if let Err(close_err) = new_raw.close().await {
                    warn!("error closing failed replacement connection: {close_err}");
                }
                Err(Error::ConnectionBroken(err))
            }
        }
    }

    /// Classify a driver failure (§4.1.3) and fold it into pool-level state:
    /// `DatabaseDown` marks this handle broken and kicks off a pool-wide
    /// termination; `ConnectionBroken` marks it for retirement on release,
    /// subject to a hook veto. Classification never swallows — the original
    /// error always comes back out, wrapped.
    async fn classify_and_wrap<T>(&mut self, result: crate::raw::DriverResult<T>) -> Result<T> {
        let driver_err = match result {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let pool = self.partition.pool();
        let hook = pool.as_ref().map(|p| p.hook());

        let hook_state = match &hook {
            Some(hook) => hook.on_mark_possibly_broken(self, driver_err.sql_state.as_ref(), &driver_err),
            None => ConnectionState::Nop,
        };

        let classification = classify(driver_err.sql_state.as_ref(), hook_state);

        match classification {
            Classification::DatabaseDown => {
                self.possibly_broken = true;
                if let Some(pool) = &pool {
                    pool.trigger_terminate_all();
                }
                Err(Error::DatabaseDown(driver_err))
            }
            Classification::ConnectionBroken => {
                let veto = hook
                    .as_ref()
                    .is_some_and(|hook| !hook.on_connection_exception(self, driver_err.sql_state.as_ref(), &driver_err));
                if !veto {
                    self.possibly_broken = true;
                }
                Err(Error::ConnectionBroken(driver_err))
            }
            Classification::DataError => Err(Error::DataError(driver_err)),
        }
    }

    pub(crate) async fn commit(&mut self) -> Result<()> {
        let result = self.raw.commit().await;
        self.record(ReplayedOp::Commit);
        let outcome = self.classify_and_wrap(result).await;
        if outcome.is_ok() {
            self.clear_replay_log();
        }
        outcome
    }

    pub(crate) async fn rollback(&mut self) -> Result<()> {
        let result = self.raw.rollback().await;
        self.record(ReplayedOp::Rollback);
        let outcome = self.classify_and_wrap(result).await;
        if outcome.is_ok() {
            self.clear_replay_log();
        }
        outcome
    }

    pub(crate) async fn rollback_to_savepoint(&mut self, savepoint: &str) -> Result<()> {
        let result = self.raw.rollback_to_savepoint(savepoint).await;
        self.record(ReplayedOp::RollbackToSavepoint(savepoint.to_owned()));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn release_savepoint(&mut self, savepoint: &str) -> Result<()> {
        let result = self.raw.release_savepoint(savepoint).await;
        self.record(ReplayedOp::ReleaseSavepoint(savepoint.to_owned()));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        let result = self.raw.set_auto_commit(auto_commit).await;
        self.record(ReplayedOp::SetAutoCommit(auto_commit));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        let result = self.raw.set_read_only(read_only).await;
        self.record(ReplayedOp::SetReadOnly(read_only));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn set_catalog(&mut self, catalog: &str) -> Result<()> {
        let result = self.raw.set_catalog(catalog).await;
        self.record(ReplayedOp::SetCatalog(catalog.to_owned()));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn set_holdability(&mut self, holdability: Holdability) -> Result<()> {
        let result = self.raw.set_holdability(holdability).await;
        self.record(ReplayedOp::SetHoldability(holdability));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        let result = self.raw.set_transaction_isolation(level).await;
        self.record(ReplayedOp::SetTransactionIsolation(level));
        self.classify_and_wrap(result).await
    }

    pub(crate) async fn clear_warnings(&mut self) -> Result<()> {
        let result = self.raw.clear_warnings().await;
        self.record(ReplayedOp::ClearWarnings);
        self.classify_and_wrap(result).await
    }

    /// Cache-aware prepare, shared by `prepare_statement` and `prepare_call`;
    /// `callable` selects which of the two disjoint caches to consult.
    pub(crate) async fn prepare(
        &mut self,
        sql: &str,
        opts: StatementOptions,
        callable: bool,
    ) -> Result<(StatementKey, Box<dyn RawStatement>, bool)> {
        let key = StatementKey::new(sql, &opts);
        let cache = if callable { &mut self.callable_cache } else { &mut self.stmt_cache };

        if let Some(stmt) = cache.take(&key) {
            if let Some(pool) = self.partition.pool() {
                if pool.config.statistics_enabled {
                    pool.stats.record_prepare(0, true);
                }
            }
            return Ok((key, stmt, true));
        }

        let started = Instant::now();
        let result = self.raw.prepare(sql, &opts).await;
        let stmt = self.classify_and_wrap(result).await?;
        if let Some(pool) = self.partition.pool() {
            if pool.config.statistics_enabled {
                pool.stats.record_prepare(started.elapsed().as_nanos() as u64, false);
            }
        }
        Ok((key, stmt, false))
    }

    pub(crate) fn stmt_cache_mut(&mut self, callable: bool) -> &mut StatementCache {
        if callable { &mut self.callable_cache } else { &mut self.stmt_cache }
    }

    pub(crate) fn record_stmt_slot(&mut self, sql: &str, opts: &StatementOptions, callable: bool) -> Option<usize> {
        if !self.should_record() {
            return None;
        }
        let slot = self.replay_log.next_statement_slot();
        let op = if callable {
            ReplayedOp::PrepareCall { stmt_index: slot, sql: sql.to_owned(), opts: opts.clone() }
        } else {
            ReplayedOp::PrepareStatement { stmt_index: slot, sql: sql.to_owned(), opts: opts.clone() }
        };
        self.replay_log.record(op);
        Some(slot)
    }

    pub(crate) fn record_execute(&mut self, stmt_index: usize, params: &[StatementParam]) {
        if self.should_record() {
            self.replay_log.record(ReplayedOp::Execute { stmt_index, params: params.to_vec() });
        }
    }

    pub(crate) async fn classify_execute(
        &mut self,
        result: crate::raw::DriverResult<u64>,
    ) -> Result<u64> {
        self.classify_and_wrap(result).await
    }

    pub(crate) fn log_statements_enabled(&self) -> bool {
        self.partition.pool().is_some_and(|pool| pool.config.log_statements_enabled)
    }
}

/// A prepared or callable statement borrowed from a connection.
///
/// Exclusively borrows the owning [`ConnectionHandle`] for its lifetime: the
/// cache-return-on-close contract (§4.1.1) is enforced by the borrow checker
/// rather than by runtime bookkeeping, since a forgotten statement can only
/// escape via `mem::forget`, never via ordinary control flow.
pub struct PreparedStatement<'c> {
    handle: &'c mut ConnectionHandle,
    key: StatementKey,
    sql: Arc<str>,
    stmt: Option<Box<dyn RawStatement>>,
    stmt_index: Option<usize>,
    callable: bool,
}

impl<'c> PreparedStatement<'c> {
    pub(crate) fn new(
        handle: &'c mut ConnectionHandle,
        key: StatementKey,
        sql: Arc<str>,
        stmt: Box<dyn RawStatement>,
        stmt_index: Option<usize>,
        callable: bool,
    ) -> Self {
        Self { handle, key, sql, stmt: Some(stmt), stmt_index, callable }
    }

    pub async fn execute(&mut self, params: &[StatementParam]) -> Result<u64> {
        let stmt = self.stmt.as_mut().expect("statement taken by a prior close");
        if self.handle.log_statements_enabled() {
            debug!("executing statement: {}", self.sql);
        }
        let result = stmt.execute(params).await;
        if let Some(idx) = self.stmt_index {
            self.handle.record_execute(idx, params);
        }
        self.handle.classify_execute(result).await
    }

    /// Explicit close. Equivalent to dropping the statement, spelled out for
    /// callers who want it to read at the call site.
    pub fn close(self) {
        drop(self)
    }
}

impl Drop for PreparedStatement<'_> {
    fn drop(&mut self) {
        let Some(stmt) = self.stmt.take() else { return };
        let cache = self.handle.stmt_cache_mut(self.callable);
        if let Some((_, victim)) = cache.insert(self.key, stmt) {
            trace!("statement cache full on connection {}; closing evicted entry", self.handle.id);
            crate::rt::spawn_detached(async move {
                let mut victim = victim;
                if let Err(err) = victim.close().await {
                    warn!("error closing evicted statement: {err}");
                }
            });
        }
    }
}

/// The public, client-facing connection wrapper.
///
/// Wraps an `Option<ConnectionHandle>` rather than a bare `ConnectionHandle`
/// so that `close()` can be both idempotent and able to actually move the
/// handle into the pool's release queue on its first call: the `Option`
/// being `None` on a later call is itself the "already closed" state, with
/// no separate boolean needed.
pub struct Connection {
    handle: Option<ConnectionHandle>,
    close_connection_watch: bool,
    disable_connection_tracking: bool,
    first_close_site: Option<&'static Location<'static>>,
}

impl Connection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        close_connection_watch: bool,
        disable_connection_tracking: bool,
    ) -> Self {
        Self {
            handle: Some(handle),
            close_connection_watch,
            disable_connection_tracking,
            first_close_site: None,
        }
    }

    fn handle_mut(&mut self) -> Result<&mut ConnectionHandle> {
        self.handle.as_mut().ok_or(Error::OperationOnClosedHandle)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.handle_mut()?.commit().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.handle_mut()?.rollback().await
    }

    pub async fn rollback_to_savepoint(&mut self, savepoint: &str) -> Result<()> {
        self.handle_mut()?.rollback_to_savepoint(savepoint).await
    }

    pub async fn release_savepoint(&mut self, savepoint: &str) -> Result<()> {
        self.handle_mut()?.release_savepoint(savepoint).await
    }

    pub async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.handle_mut()?.set_auto_commit(auto_commit).await
    }

    pub async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.handle_mut()?.set_read_only(read_only).await
    }

    pub async fn set_catalog(&mut self, catalog: &str) -> Result<()> {
        self.handle_mut()?.set_catalog(catalog).await
    }

    pub async fn set_holdability(&mut self, holdability: Holdability) -> Result<()> {
        self.handle_mut()?.set_holdability(holdability).await
    }

    pub async fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.handle_mut()?.set_transaction_isolation(level).await
    }

    pub async fn clear_warnings(&mut self) -> Result<()> {
        self.handle_mut()?.clear_warnings().await
    }

    pub async fn is_valid(&mut self, timeout: Duration) -> Result<bool> {
        Ok(self.handle_mut()?.probe_alive(timeout).await)
    }

    /// Attempt transaction recovery (§4.2) after a `ConnectionBroken` or
    /// `DatabaseDown` error interrupted an in-progress transaction.
    pub async fn recover(&mut self) -> Result<TransactionRecoveryResult> {
        self.handle_mut()?.recover().await
    }

    pub async fn prepare_statement(
        &mut self,
        sql: &str,
        opts: StatementOptions,
    ) -> Result<PreparedStatement<'_>> {
        self.prepare_inner(sql, opts, false).await
    }

    pub async fn prepare_call(
        &mut self,
        sql: &str,
        opts: StatementOptions,
    ) -> Result<PreparedStatement<'_>> {
        self.prepare_inner(sql, opts, true).await
    }

    async fn prepare_inner(
        &mut self,
        sql: &str,
        opts: StatementOptions,
        callable: bool,
    ) -> Result<PreparedStatement<'_>> {
        let handle = self.handle_mut()?;
        let slot = handle.record_stmt_slot(sql, &opts, callable);
        let sql_owned: Arc<str> = Arc::from(sql);
        let (key, stmt, _hit) = handle.prepare(sql, opts, callable).await?;
        Ok(PreparedStatement::new(handle, key, sql_owned, stmt, slot, callable))
    }

    /// Idempotent. The first call moves the handle out and enqueues it on
    /// the pool's release queue; later calls are a no-op, logged (with both
    /// call-site locations) only when close-connection watching is enabled.
    #[track_caller]
    pub fn close(&mut self) {
        let caller = Location::caller();
        match self.handle.take() {
            Some(mut handle) => {
                handle.logically_closed = true;
                self.first_close_site = Some(caller);
                let id = handle.id;
                if let Some(pool) = handle.partition.pool() {
                    if let Err(err) = pool.release_tx.send(handle) {
                        warn!("failed to enqueue connection {id} for release: channel closed");
                        drop(err);
                    }
                } else {
                    warn!("connection {id} closed after its pool was dropped; dropping in place");
                }
            }
            None if self.close_connection_watch => {
                warn!(
                    "double close detected: first close at {:?}, second close at {caller}",
                    self.first_close_site,
                );
            }
            None => {}
        }
    }
}

impl Drop for Connection {
    /// Implicit release for a leaked/forgotten `Connection`. When connection
    /// tracking is disabled, a client that never calls `close()` leaks the
    /// physical connection rather than paying for this bookkeeping, matching
    /// the option's documented effect.
    fn drop(&mut self) {
        if self.handle.is_some() && !self.disable_connection_tracking {
            self.close();
        }
    }
}
