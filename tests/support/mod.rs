//! Shared in-memory stand-in for a real driver, used across the integration
//! tests in this directory. Lets a test script a sequence of connect
//! failures, fail a specific SQL-state on a specific operation, and count how
//! many times `prepare` actually hit the "driver" rather than the cache.
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbpool::classify::SqlState;
use dbpool::{ConnectFn, DriverError, DriverResult, Holdability, IsolationLevel};
use dbpool::{RawConnection, RawStatement, StatementOptions, StatementParam};
use futures_core::future::BoxFuture;

#[derive(Clone)]
pub struct StubControl(Arc<Inner>);

struct Inner {
    connects: AtomicUsize,
    prepares: AtomicUsize,
    connect_failures: Mutex<VecDeque<(String, String)>>,
    fail_commit_once: Mutex<Option<String>>,
}

impl StubControl {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            connects: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            connect_failures: Mutex::new(VecDeque::new()),
            fail_commit_once: Mutex::new(None),
        }))
    }

    pub fn connects(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    pub fn prepares(&self) -> usize {
        self.0.prepares.load(Ordering::SeqCst)
    }

    pub fn queue_connect_failure(&self, sql_state: &str, message: &str) {
        self.0.connect_failures.lock().unwrap().push_back((sql_state.to_owned(), message.to_owned()));
    }

    pub fn fail_next_commit(&self, sql_state: &str) {
        *self.0.fail_commit_once.lock().unwrap() = Some(sql_state.to_owned());
    }

    fn next_connect_failure(&self) -> Option<(String, String)> {
        self.0.connect_failures.lock().unwrap().pop_front()
    }

    fn take_commit_failure(&self) -> Option<String> {
        self.0.fail_commit_once.lock().unwrap().take()
    }
}

/// Build a [`ConnectFn`] backed by `control`, counting connects and honoring
/// any queued connect failures.
pub fn connect_fn(control: StubControl) -> ConnectFn {
    Arc::new(move || {
        let control = control.clone();
        Box::pin(async move {
            if let Some((sql_state, message)) = control.next_connect_failure() {
                return Err(DriverError::new(SqlState::new(&sql_state), message));
            }
            let id = control.0.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubConnection { id, control }) as Box<dyn RawConnection>)
        })
    })
}

pub struct StubConnection {
    #[allow(dead_code)]
    id: usize,
    control: StubControl,
}

impl RawConnection for StubConnection {
    fn prepare<'a>(
        &'a mut self,
        sql: &'a str,
        _opts: &'a StatementOptions,
    ) -> BoxFuture<'a, DriverResult<Box<dyn RawStatement>>> {
        self.control.0.prepares.fetch_add(1, Ordering::SeqCst);
        let sql = sql.to_owned();
        Box::pin(async move { Ok(Box::new(StubStatement { sql }) as Box<dyn RawStatement>) })
    }

    fn commit(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        let failure = self.control.take_commit_failure();
        Box::pin(async move {
            match failure {
                Some(sql_state) => Err(DriverError::new(SqlState::new(&sql_state), "injected commit failure")),
                None => Ok(()),
            }
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn rollback_to_savepoint<'a>(&'a mut self, _savepoint: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn release_savepoint<'a>(&'a mut self, _savepoint: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn set_auto_commit(&mut self, _auto_commit: bool) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn set_read_only(&mut self, _read_only: bool) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn set_catalog<'a>(&'a mut self, _catalog: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn set_holdability(&mut self, _holdability: Holdability) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn set_transaction_isolation(&mut self, _level: IsolationLevel) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn clear_warnings(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn is_valid(&mut self, _timeout: Duration) -> BoxFuture<'_, DriverResult<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

struct StubStatement {
    #[allow(dead_code)]
    sql: String,
}

impl RawStatement for StubStatement {
    fn execute(&mut self, _params: &[StatementParam]) -> BoxFuture<'_, DriverResult<u64>> {
        Box::pin(async { Ok(0) })
    }

    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
