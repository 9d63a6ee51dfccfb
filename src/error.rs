//! Pool-level error types.
use std::time::Duration;

use crate::classify::SqlState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the raw driver layer, opaque to the pool beyond a SQL state code.
///
/// The pool never constructs one of these itself; a [`RawConnection`][crate::raw::RawConnection]
/// implementation returns it from any fallible operation.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub sql_state: Option<SqlState>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    pub fn new(sql_state: impl Into<Option<SqlState>>, message: impl Into<String>) -> Self {
        Self { sql_state: sql_state.into(), message: message.into(), source: None }
    }
}

/// All errors returned from the public pool API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every attempt to obtain a new physical connection failed and the
    /// retry policy was exhausted.
    #[error("failed to acquire a new connection after exhausting retries")]
    AcquisitionFailed(#[source] DriverError),

    /// The configured connection timeout elapsed while waiting for a free connection.
    #[error("timed out after {0:?} waiting for a free connection")]
    AcquisitionTimedOut(Duration),

    /// A client called an operation on a handle that was already logically closed.
    #[error("operation attempted on a logically closed connection handle")]
    OperationOnClosedHandle,

    /// The classifier decided the whole database is unreachable; the pool has
    /// begun (or already finished) terminating all of its connections.
    #[error("database appears to be down: {0}")]
    DatabaseDown(#[source] DriverError),

    /// The classifier decided only this connection is unusable; it will be
    /// retired rather than re-pooled on release.
    #[error("connection is possibly broken: {0}")]
    ConnectionBroken(#[source] DriverError),

    /// A driver error that does not indicate a broken connection (e.g. a
    /// constraint violation); passed through unchanged.
    #[error("database error: {0}")]
    DataError(#[source] DriverError),

    /// The pool is shutting down (or has been shut down) and refuses new work.
    #[error("pool shutdown in progress")]
    ShutdownInProgress,

    /// `PoolConfigBuilder::build` was called with an inconsistent configuration.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// `true` for the error kinds that a caller might reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AcquisitionTimedOut(_) | Error::DatabaseDown(_))
    }
}
