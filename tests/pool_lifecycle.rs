//! End-to-end lifecycle scenarios (§8 S1-S5) against the in-memory stub
//! driver in `tests/support`.
mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dbpool::{Error, Pool, PoolConfig, StatementOptions};
use support::{connect_fn, StubControl};

fn config(control: &StubControl) -> dbpool::PoolConfigBuilder {
    PoolConfig::builder(connect_fn(control.clone()))
}

/// S1: partitionCount=1, min=max=2, timeout=100ms. Two concurrent checkouts
/// succeed; a third blocks and then fails with `AcquisitionTimedOut`.
#[tokio::test]
async fn s1_third_checkout_times_out() {
    let control = StubControl::new();
    let pool = Pool::connect(
        config(&control)
            .partition_count(1)
            .min_connections_per_partition(2)
            .max_connections_per_partition(2)
            .connection_timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();

    let started = Instant::now();
    let third = pool.acquire().await;
    let elapsed = started.elapsed();

    assert!(matches!(third, Err(Error::AcquisitionTimedOut(_))));
    assert!(elapsed >= Duration::from_millis(90), "timed out too early: {elapsed:?}");

    drop(first);
    drop(second);
}

/// S2: a statement prepared, closed, and prepared again with the cache still
/// warm is a cache hit — no second driver-level prepare.
#[tokio::test]
async fn s2_statement_cache_hit_after_close() {
    let control = StubControl::new();
    let pool = Pool::connect(
        config(&control)
            .partition_count(1)
            .min_connections_per_partition(1)
            .max_connections_per_partition(1)
            .statements_cache_size(4)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();

    {
        let mut stmt = conn.prepare_statement("select 1", StatementOptions::default()).await.unwrap();
        stmt.execute(&[]).await.unwrap();
    }
    assert_eq!(control.prepares(), 1);

    {
        let mut stmt = conn.prepare_statement("select 1", StatementOptions::default()).await.unwrap();
        stmt.execute(&[]).await.unwrap();
    }
    assert_eq!(control.prepares(), 1, "second prepare of identical SQL should hit the cache");

    {
        let mut stmt = conn.prepare_statement("select 2", StatementOptions::default()).await.unwrap();
        stmt.execute(&[]).await.unwrap();
    }
    assert_eq!(control.prepares(), 2, "distinct SQL text is always a miss");
}

/// S3: the first two connection attempts fail, the third succeeds; the pool
/// only becomes ready after paying the configured retry delay.
#[tokio::test]
async fn s3_initial_provisioning_retries_past_transient_failures() {
    let control = StubControl::new();
    control.queue_connect_failure("08001", "connection refused");
    control.queue_connect_failure("08001", "connection refused");

    let started = Instant::now();
    let pool = Pool::connect(
        config(&control)
            .partition_count(1)
            .min_connections_per_partition(1)
            .max_connections_per_partition(1)
            .acquire_retry_attempts(3)
            .acquire_retry_delay(Duration::from_millis(10))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(20), "should have paid two retry delays: {elapsed:?}");
    assert_eq!(control.connects(), 1, "exactly one connect actually succeeded");

    let conn = pool.acquire().await.unwrap();
    drop(conn);
}

/// S4: a `DATABASE_DOWN`-classified commit failure drains and retires every
/// connection; the pool comes back once reprovisioning completes.
#[tokio::test]
async fn s4_database_down_triggers_termination_and_recovers() {
    let control = StubControl::new();
    let pool = Arc::new(
        Pool::connect(
            config(&control)
                .partition_count(1)
                .min_connections_per_partition(1)
                .max_connections_per_partition(1)
                .connection_timeout(Duration::from_millis(500))
                .build()
                .unwrap(),
        )
        .await
        .unwrap(),
    );

    assert_eq!(control.connects(), 1);

    let mut conn = pool.acquire().await.unwrap();
    control.fail_next_commit("08S01");
    let result = conn.commit().await;
    assert!(matches!(result, Err(Error::DatabaseDown(_))));
    drop(conn);

    // Termination and reprovisioning run on a spawned background task; give
    // it a moment, then confirm the pool is usable again.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let recovered = pool.acquire().await;
    assert!(recovered.is_ok(), "pool should have reprovisioned after terminateAllConnections");
    assert!(control.connects() >= 2, "a replacement connection should have been established");
}

/// S5: calling `close()` twice on the same `Connection` never panics or
/// returns an error; the second call is a documented no-op.
#[tokio::test]
async fn s5_double_close_is_idempotent() {
    let control = StubControl::new();
    let pool = Pool::connect(
        config(&control)
            .partition_count(1)
            .min_connections_per_partition(1)
            .max_connections_per_partition(1)
            .close_connection_watch(true)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    conn.close();
    assert!(conn.is_closed());
    conn.close();
    assert!(conn.is_closed());
}

/// S6: a `CONNECTION_BROKEN` commit failure mid-transaction is recoverable —
/// `recover()` obtains a fresh physical connection, replays every recorded
/// operation onto it, and hands back the remapped statement for the slot
/// prepared before the failure.
#[tokio::test]
async fn s6_transaction_recovery_replays_onto_fresh_connection() {
    let control = StubControl::new();
    let pool = Pool::connect(
        config(&control)
            .partition_count(1)
            .min_connections_per_partition(1)
            .max_connections_per_partition(1)
            .transaction_recovery_enabled(true)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(control.connects(), 1);

    let mut conn = pool.acquire().await.unwrap();
    conn.set_auto_commit(false).await.unwrap();

    {
        let mut stmt = conn
            .prepare_statement("insert into t values (1)", StatementOptions::default())
            .await
            .unwrap();
        stmt.execute(&[]).await.unwrap();
    }
    assert_eq!(control.prepares(), 1);

    control.fail_next_commit("08003");
    let result = conn.commit().await;
    assert!(matches!(result, Err(Error::ConnectionBroken(_))));

    let mut recovery = conn.recover().await.expect("transaction should replay onto a fresh connection");
    assert!(recovery.statement(0).is_some(), "the prepared statement's slot should be remapped");

    assert_eq!(control.connects(), 2, "recovery should have obtained exactly one replacement connection");
    assert_eq!(control.prepares(), 2, "replay should have re-prepared the one recorded statement");
}

/// Any operation after `close()` fails with `OperationOnClosedHandle` rather
/// than touching the (already-released) underlying connection.
#[tokio::test]
async fn operation_after_close_is_rejected() {
    let control = StubControl::new();
    let pool = Pool::connect(
        config(&control)
            .partition_count(1)
            .min_connections_per_partition(1)
            .max_connections_per_partition(1)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    conn.close();

    let result = conn.commit().await;
    assert!(matches!(result, Err(Error::OperationOnClosedHandle)));
}
