//! Transaction replay (§4.2): recording and replaying the operations of a
//! transaction onto a fresh physical connection after a `CONNECTION_BROKEN`
//! classification mid-transaction.
//!
//! Realized here as a single forwarding wrapper recording through an
//! explicit operation enum, rather than a dispatch table or generated proxy.
use std::collections::HashMap;

use log::{debug, warn};

use crate::classify::{classify, Classification, ConnectionState};
use crate::error::DriverError;
use crate::raw::{
    Holdability, IsolationLevel, RawConnection, StatementOptions, StatementParam,
};

/// One recorded operation. `stmt_index` fields refer to the nth statement
/// prepared since the log was last cleared, in recording order.
#[derive(Debug, Clone)]
pub enum ReplayedOp {
    SetAutoCommit(bool),
    SetReadOnly(bool),
    SetCatalog(String),
    SetHoldability(Holdability),
    SetTransactionIsolation(IsolationLevel),
    ClearWarnings,
    PrepareStatement { stmt_index: usize, sql: String, opts: StatementOptions },
    PrepareCall { stmt_index: usize, sql: String, opts: StatementOptions },
    Execute { stmt_index: usize, params: Vec<StatementParam> },
    Commit,
    Rollback,
    RollbackToSavepoint(String),
    ReleaseSavepoint(String),
}

/// Ordered record of operations applied to a handle during the current
/// transaction. Cleared on commit/rollback (§3 ReplayLog).
#[derive(Debug, Default)]
pub struct ReplayLog {
    ops: Vec<ReplayedOp>,
    next_stmt_index: usize,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, op: ReplayedOp) {
        self.ops.push(op);
    }

    /// Allocate the next statement slot, for use when recording a
    /// `PrepareStatement`/`PrepareCall` operation.
    pub fn next_statement_slot(&mut self) -> usize {
        let slot = self.next_stmt_index;
        self.next_stmt_index += 1;
        slot
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.next_stmt_index = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplayedOp> {
        self.ops.iter()
    }
}

/// Maps the statement slots referenced by a [`ReplayLog`] onto freshly
/// prepared statements obtained on the replacement connection.
#[derive(Default)]
pub struct TransactionRecoveryResult {
    statements: HashMap<usize, Box<dyn crate::raw::RawStatement>>,
}

impl TransactionRecoveryResult {
    pub fn statement(&mut self, slot: usize) -> Option<&mut Box<dyn crate::raw::RawStatement>> {
        self.statements.get_mut(&slot)
    }
}

/// Replays a [`ReplayLog`] against a fresh [`RawConnection`].
pub struct Replayer;

impl Replayer {
    /// Walk `log` applying every operation to `conn`. Succeeds iff every
    /// operation replays without a `CONNECTION_BROKEN` classification; any
    /// other driver error (a `DataError`) is treated as a pre-existing
    /// application-level condition and does not abort the replay, matching
    /// the original transaction's own error tolerance.
    pub async fn replay(
        log: &ReplayLog,
        conn: &mut dyn RawConnection,
    ) -> Result<TransactionRecoveryResult, DriverError> {
        let mut result = TransactionRecoveryResult::default();

        for op in log.iter() {
            debug!("replaying operation: {op:?}");
            let outcome: Result<(), DriverError> = match op {
                ReplayedOp::SetAutoCommit(v) => conn.set_auto_commit(*v).await,
                ReplayedOp::SetReadOnly(v) => conn.set_read_only(*v).await,
                ReplayedOp::SetCatalog(catalog) => conn.set_catalog(catalog).await,
                ReplayedOp::SetHoldability(h) => conn.set_holdability(*h).await,
                ReplayedOp::SetTransactionIsolation(level) => {
                    conn.set_transaction_isolation(*level).await
                }
                ReplayedOp::ClearWarnings => conn.clear_warnings().await,
                ReplayedOp::PrepareStatement { stmt_index, sql, opts } => {
                    conn.prepare(sql, opts).await.map(|stmt| {
                        result.statements.insert(*stmt_index, stmt);
                    })
                }
                ReplayedOp::PrepareCall { stmt_index, sql, opts } => {
                    conn.prepare(sql, opts).await.map(|stmt| {
                        result.statements.insert(*stmt_index, stmt);
                    })
                }
                ReplayedOp::Execute { stmt_index, params } => match result.statement(*stmt_index) {
                    Some(stmt) => stmt.execute(params).await.map(|_| ()),
                    None => Err(DriverError::new(None, "replay referenced an unknown statement slot")),
                },
                ReplayedOp::Commit => conn.commit().await,
                ReplayedOp::Rollback => conn.rollback().await,
                ReplayedOp::RollbackToSavepoint(sp) => conn.rollback_to_savepoint(sp).await,
                ReplayedOp::ReleaseSavepoint(sp) => conn.release_savepoint(sp).await,
            };

            if let Err(err) = outcome {
                let classification = classify(err.sql_state.as_ref(), ConnectionState::Nop);
                if classification == Classification::ConnectionBroken
                    || classification == Classification::DatabaseDown
                {
                    warn!("replay aborted: {op:?} reclassified the replacement connection as broken");
                    return Err(err);
                }
            }
        }

        Ok(result)
    }
}
