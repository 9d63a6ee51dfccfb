//! A partitioned, asynchronous database connection pool.
//!
//! The pool hands out logical [`handle::Connection`] wrappers around opaque
//! [`raw::RawConnection`] implementations, sharding physical connections
//! across independent [`partition`]s to keep checkout contention low, caching
//! prepared statements per connection, and classifying driver failures to
//! decide what to do with a connection once it fails.
//!
//! The database wire protocol, authentication and connection-string parsing
//! are explicitly out of scope: callers provide a [`raw::ConnectFn`] factory
//! and everything below that boundary is the driver crate's problem.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod handle;
pub mod hooks;
mod partition;
mod pool;
pub mod raw;
pub mod replay;
mod rt;
pub mod stats;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{DriverError, Error, Result};
pub use handle::{Connection, ConnectionHandle, PreparedStatement};
pub use hooks::{AcquireFailConfig, ConnectionHook, NopHook};
pub use pool::Pool;
pub use replay::{ReplayLog, ReplayedOp, Replayer, TransactionRecoveryResult};
pub use raw::{
    ConnectFn, DriverResult, Holdability, IsolationLevel, RawConnection, RawStatement,
    StatementKey, StatementOptions, StatementParam,
};
pub use stats::{Statistics, StatisticsSnapshot};
