//! The opaque "raw connection" capability set (§6, out-of-scope external collaborator).
//!
//! The pool never knows anything about a concrete database driver. It only
//! asks for a type implementing [`RawConnection`] (and statements it produces
//! implementing [`RawStatement`]); everything below this boundary — wire
//! protocol, authentication, the datasource façade — is somebody else's
//! problem, per §1.
use std::any::Any;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use futures_core::future::BoxFuture;

use crate::error::DriverError;

pub type DriverResult<T> = Result<T, DriverError>;

/// Isolation levels forwarded to `set_transaction_isolation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Holdability forwarded to `set_holdability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Holdability {
    HoldCursorsOverCommit,
    CloseCursorsAtCommit,
}

/// The variant arguments that, together with the SQL text, make up a statement
/// cache key (§3 StatementCache).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StatementOptions {
    pub result_set_type: Option<u8>,
    pub result_set_concurrency: Option<u8>,
    pub result_set_holdability: Option<Holdability>,
    pub auto_generated_keys: bool,
    pub column_indexes: Vec<u32>,
    pub column_names: Vec<String>,
    /// Callable statements and plain prepared statements are cached in
    /// disjoint namespaces even for identical SQL text.
    pub callable: bool,
}

/// The canonical key a [`StatementOptions`] plus SQL text hashes down to.
///
/// A `u64` hash (via [`std::hash::DefaultHasher`]) rather than a literal
/// "canonical string" is used for the key itself: it is cheaper to hash once
/// up front than to format and compare strings on every cache lookup, and
/// collisions are not a correctness concern here since the only consequence
/// of one would be an extra prepare, never a wrong result (the underlying
/// `RawStatement` is always re-validated by the caller's own query text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementKey(u64);

impl StatementKey {
    pub fn new(sql: &str, opts: &StatementOptions) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        sql.hash(&mut hasher);
        opts.hash(&mut hasher);
        StatementKey(hasher.finish())
    }
}

/// A prepared or callable statement handle produced by a [`RawConnection`].
pub trait RawStatement: Send {
    /// Execute the statement, returning the number of rows affected (or `0`
    /// for result-set-producing statements; row streaming itself is part of
    /// the driver API this crate treats as opaque).
    fn execute(&mut self, params: &[StatementParam]) -> BoxFuture<'_, DriverResult<u64>>;

    /// Physically close the underlying driver statement. Called when a
    /// statement is evicted from the cache or the owning connection is retired.
    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>>;
}

/// A single bound parameter value. Intentionally minimal: encoding richer
/// driver types is the driver crate's job, not the pool's.
#[derive(Debug, Clone)]
pub enum StatementParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// The full database-connection capability set the pool forwards client
/// operations through (§6 client-visible API).
pub trait RawConnection: Send + 'static {
    fn prepare<'a>(
        &'a mut self,
        sql: &'a str,
        opts: &'a StatementOptions,
    ) -> BoxFuture<'a, DriverResult<Box<dyn RawStatement>>>;

    fn commit(&mut self) -> BoxFuture<'_, DriverResult<()>>;
    fn rollback(&mut self) -> BoxFuture<'_, DriverResult<()>>;
    fn rollback_to_savepoint<'a>(&'a mut self, savepoint: &'a str) -> BoxFuture<'a, DriverResult<()>>;
    fn release_savepoint<'a>(&'a mut self, savepoint: &'a str) -> BoxFuture<'a, DriverResult<()>>;
    fn set_auto_commit(&mut self, auto_commit: bool) -> BoxFuture<'_, DriverResult<()>>;
    fn set_read_only(&mut self, read_only: bool) -> BoxFuture<'_, DriverResult<()>>;
    fn set_catalog<'a>(&'a mut self, catalog: &'a str) -> BoxFuture<'a, DriverResult<()>>;
    fn set_holdability(&mut self, holdability: Holdability) -> BoxFuture<'_, DriverResult<()>>;
    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> BoxFuture<'_, DriverResult<()>>;
    fn clear_warnings(&mut self) -> BoxFuture<'_, DriverResult<()>>;

    /// Keep-alive probe (§4.1.2): "execute a configured test query or driver isValid".
    fn is_valid(&mut self, timeout: Duration) -> BoxFuture<'_, DriverResult<bool>>;

    /// Physically close this connection. Called on retirement for any reason.
    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>>;

    /// Escape hatch for driver-specific extensions (large objects, structured
    /// and array types, anything else the opaque trait above doesn't name):
    /// rather than adding one method per driver-specific type, this exposes
    /// the underlying concrete type for callers to downcast to.
    fn as_any(&mut self) -> &mut dyn Any;
}

/// Factory used by the pool to obtain brand-new physical connections.
///
/// Concrete connection-string parsing and the datasource façade are out of
/// scope (§1); the pool is handed an opaque async factory instead.
pub type ConnectFn =
    std::sync::Arc<dyn Fn() -> BoxFuture<'static, DriverResult<Box<dyn RawConnection>>> + Send + Sync>;
