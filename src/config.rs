//! Pool configuration (§6), assembled through a builder and validated once at
//! `build()` time rather than accepted as a raw struct literal.
use std::time::Duration;

use crate::error::{Error, Result};
use crate::raw::ConnectFn;

/// Fully validated pool configuration. Constructed only via [`PoolConfigBuilder`].
#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) connect: ConnectFn,
    pub(crate) min_connections_per_partition: usize,
    pub(crate) max_connections_per_partition: usize,
    pub(crate) partition_count: usize,
    pub(crate) acquire_increment: usize,
    pub(crate) connection_timeout: Duration,
    pub(crate) idle_max_age: Option<Duration>,
    pub(crate) idle_connection_test_period: Option<Duration>,
    pub(crate) max_connection_age: Option<Duration>,
    pub(crate) statements_cache_size: usize,
    pub(crate) acquire_retry_attempts: i64,
    pub(crate) acquire_retry_delay: Duration,
    pub(crate) init_sql: Option<String>,
    pub(crate) transaction_recovery_enabled: bool,
    pub(crate) close_connection_watch: bool,
    pub(crate) log_statements_enabled: bool,
    pub(crate) statistics_enabled: bool,
    pub(crate) disable_connection_tracking: bool,
    pub(crate) release_worker_count: usize,
}

impl PoolConfig {
    pub fn builder(connect: ConnectFn) -> PoolConfigBuilder {
        PoolConfigBuilder::new(connect)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections_per_partition * self.partition_count
    }
}

/// Builder for [`PoolConfig`]. Mirrors the options enumerated in §6 one-for-one.
pub struct PoolConfigBuilder {
    connect: ConnectFn,
    min_connections_per_partition: usize,
    max_connections_per_partition: usize,
    partition_count: usize,
    acquire_increment: usize,
    connection_timeout: Duration,
    idle_max_age: Option<Duration>,
    idle_connection_test_period: Option<Duration>,
    max_connection_age: Option<Duration>,
    statements_cache_size: usize,
    acquire_retry_attempts: i64,
    acquire_retry_delay: Duration,
    init_sql: Option<String>,
    transaction_recovery_enabled: bool,
    close_connection_watch: bool,
    log_statements_enabled: bool,
    statistics_enabled: bool,
    disable_connection_tracking: bool,
    release_worker_count: usize,
}

impl PoolConfigBuilder {
    pub fn new(connect: ConnectFn) -> Self {
        Self {
            connect,
            min_connections_per_partition: 5,
            max_connections_per_partition: 20,
            partition_count: 2,
            acquire_increment: 2,
            connection_timeout: Duration::from_secs(30),
            idle_max_age: Some(Duration::from_secs(60 * 60)),
            idle_connection_test_period: Some(Duration::from_secs(5 * 60)),
            max_connection_age: None,
            statements_cache_size: 24,
            acquire_retry_attempts: 5,
            acquire_retry_delay: Duration::from_millis(200),
            init_sql: None,
            transaction_recovery_enabled: false,
            close_connection_watch: false,
            log_statements_enabled: false,
            statistics_enabled: true,
            disable_connection_tracking: false,
            release_worker_count: 2,
        }
    }

    pub fn min_connections_per_partition(mut self, n: usize) -> Self {
        self.min_connections_per_partition = n;
        self
    }

    pub fn max_connections_per_partition(mut self, n: usize) -> Self {
        self.max_connections_per_partition = n;
        self
    }

    pub fn partition_count(mut self, n: usize) -> Self {
        self.partition_count = n;
        self
    }

    pub fn acquire_increment(mut self, n: usize) -> Self {
        self.acquire_increment = n;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn idle_max_age(mut self, age: impl Into<Option<Duration>>) -> Self {
        self.idle_max_age = age.into();
        self
    }

    pub fn idle_connection_test_period(mut self, period: impl Into<Option<Duration>>) -> Self {
        self.idle_connection_test_period = period.into();
        self
    }

    pub fn max_connection_age(mut self, age: impl Into<Option<Duration>>) -> Self {
        self.max_connection_age = age.into();
        self
    }

    pub fn statements_cache_size(mut self, size: usize) -> Self {
        self.statements_cache_size = size;
        self
    }

    /// `-1` means infinite retries, matching §6.
    pub fn acquire_retry_attempts(mut self, attempts: i64) -> Self {
        self.acquire_retry_attempts = attempts;
        self
    }

    pub fn acquire_retry_delay(mut self, delay: Duration) -> Self {
        self.acquire_retry_delay = delay;
        self
    }

    pub fn init_sql(mut self, sql: impl Into<Option<String>>) -> Self {
        self.init_sql = sql.into();
        self
    }

    pub fn transaction_recovery_enabled(mut self, enabled: bool) -> Self {
        self.transaction_recovery_enabled = enabled;
        self
    }

    pub fn close_connection_watch(mut self, enabled: bool) -> Self {
        self.close_connection_watch = enabled;
        self
    }

    pub fn log_statements_enabled(mut self, enabled: bool) -> Self {
        self.log_statements_enabled = enabled;
        self
    }

    pub fn statistics_enabled(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    pub fn disable_connection_tracking(mut self, disabled: bool) -> Self {
        self.disable_connection_tracking = disabled;
        self
    }

    pub fn release_worker_count(mut self, n: usize) -> Self {
        self.release_worker_count = n;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        if self.partition_count == 0 {
            return Err(Error::Configuration("partition_count must be at least 1".into()));
        }
        if self.max_connections_per_partition == 0 {
            return Err(Error::Configuration(
                "max_connections_per_partition must be at least 1".into(),
            ));
        }
        if self.min_connections_per_partition > self.max_connections_per_partition {
            return Err(Error::Configuration(
                "min_connections_per_partition cannot exceed max_connections_per_partition".into(),
            ));
        }
        if self.acquire_increment == 0 {
            return Err(Error::Configuration("acquire_increment must be at least 1".into()));
        }
        if self.release_worker_count == 0 {
            return Err(Error::Configuration("release_worker_count must be at least 1".into()));
        }

        Ok(PoolConfig {
            connect: self.connect,
            min_connections_per_partition: self.min_connections_per_partition,
            max_connections_per_partition: self.max_connections_per_partition,
            partition_count: self.partition_count,
            acquire_increment: self.acquire_increment,
            connection_timeout: self.connection_timeout,
            idle_max_age: self.idle_max_age,
            idle_connection_test_period: self.idle_connection_test_period,
            max_connection_age: self.max_connection_age,
            statements_cache_size: self.statements_cache_size,
            acquire_retry_attempts: self.acquire_retry_attempts,
            acquire_retry_delay: self.acquire_retry_delay,
            init_sql: self.init_sql,
            transaction_recovery_enabled: self.transaction_recovery_enabled,
            close_connection_watch: self.close_connection_watch,
            log_statements_enabled: self.log_statements_enabled,
            statistics_enabled: self.statistics_enabled,
            disable_connection_tracking: self.disable_connection_tracking,
            release_worker_count: self.release_worker_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_connect() -> ConnectFn {
        std::sync::Arc::new(|| Box::pin(async { unreachable!("not invoked in config tests") }))
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let err = PoolConfig::builder(stub_connect())
            .min_connections_per_partition(10)
            .max_connections_per_partition(5)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_zero_partitions() {
        let err = PoolConfig::builder(stub_connect()).partition_count(0).build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn default_builds_successfully() {
        let config = PoolConfig::builder(stub_connect()).build().unwrap();
        assert_eq!(config.max_connections(), 20 * 2);
    }
}
