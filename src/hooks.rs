//! The single pool extension point (§4.5).
use std::time::Duration;

use crate::classify::{ConnectionState, SqlState};
use crate::error::DriverError;
use crate::handle::ConnectionHandle;

/// Configuration visible to [`ConnectionHook::on_acquire_fail`], describing the
/// retry policy the growth worker is currently running under.
#[derive(Debug, Clone, Copy)]
pub struct AcquireFailConfig {
    pub attempts_left: i64,
    pub retry_delay: Duration,
}

/// Extension interface for observing and steering pool behavior.
///
/// Every method has a no-op default, so implementers only override what they
/// need (the same shape as an event-handler trait with optional callbacks).
pub trait ConnectionHook: Send + Sync {
    /// Called after a new physical connection has been established and added
    /// to a partition.
    fn on_acquire(&self, _handle: &ConnectionHandle) {}

    /// Called when an attempt to establish a new physical connection failed.
    /// Returning `false` aborts the retry loop early regardless of
    /// `attempts_left`.
    fn on_acquire_fail(&self, _error: &DriverError, _config: AcquireFailConfig) -> bool {
        true
    }

    /// Called when a handle is returned to its partition (logically closed
    /// and successfully released).
    fn on_check_in(&self, _handle: &ConnectionHandle) {}

    /// Called when a handle is handed out to a client via `Pool::acquire`.
    fn on_check_out(&self, _handle: &ConnectionHandle) {}

    /// Called just before a handle's raw connection is physically closed.
    fn on_destroy(&self, _handle: &ConnectionHandle) {}

    /// Consulted during failure classification (§4.1.3); may upgrade the
    /// classification the SQL-state table alone would have produced.
    fn on_mark_possibly_broken(
        &self,
        _handle: &ConnectionHandle,
        _sql_state: Option<&SqlState>,
        _error: &DriverError,
    ) -> ConnectionState {
        ConnectionState::Nop
    }

    /// Consulted after a handle has been marked possibly broken; returning
    /// `false` vetoes the flag (the client understands this database's error
    /// codes better than the generic classifier does).
    fn on_connection_exception(
        &self,
        _handle: &ConnectionHandle,
        _sql_state: Option<&SqlState>,
        _error: &DriverError,
    ) -> bool {
        true
    }
}

/// The hook used when a pool is not given one explicitly.
pub struct NopHook;

impl ConnectionHook for NopHook {}
