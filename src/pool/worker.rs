//! Background maintenance workers (§5): release, growth, keep-alive/eviction.
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};

use super::PoolShared;
use crate::partition::PartitionShared;

/// Drains the pool-wide release queue, returning handles to their originating
/// partition or retiring them. A non-cancellation failure is logged and the
/// worker keeps running (§9 open question: adopted as specified rather than
/// letting one bad handle permanently shrink release capacity); only the
/// channel closing (pool dropped) ends the loop.
pub(super) fn spawn_release_worker(shared: Arc<PoolShared>) -> crate::rt::JoinHandle<()> {
    crate::rt::spawn(async move {
        loop {
            // The pool itself holds a sender (so clients can always enqueue a
            // close), which means this channel never closes on its own while
            // the pool lives — recv() is wrapped in a bounded wait so the
            // worker periodically comes up for air and checks the shutdown
            // flag instead of relying on channel closure to ever happen.
            let woke = {
                let mut rx = shared.release_rx.lock().await;
                crate::rt::timeout(Duration::from_millis(500), rx.recv()).await
            };

            match woke {
                Ok(Some(handle)) => shared.internal_release(handle).await,
                Ok(None) => {
                    trace!("release queue closed; release worker exiting");
                    break;
                }
                Err(_timed_out) => {
                    if shared.is_shutting_down() {
                        let mut rx = shared.release_rx.lock().await;
                        while let Ok(handle) = rx.try_recv() {
                            shared.internal_release(handle).await;
                        }
                        break;
                    }
                }
            }
        }
    })
}

/// Per-partition growth worker: wakes on the partition's growth signal (or
/// periodically, as a backstop against a missed notification) and tops the
/// partition up by the configured acquire increment, never past `max`.
pub(super) fn spawn_growth_worker(
    shared: Arc<PoolShared>,
    partition: Arc<PartitionShared>,
) -> crate::rt::JoinHandle<()> {
    crate::rt::spawn(async move {
        loop {
            if shared.is_shutting_down() {
                break;
            }

            if shared.is_down() {
                crate::rt::sleep(Duration::from_millis(200)).await;
                continue;
            }

            if !partition.needs_growth() {
                // Bounded backstop against a missed `Notify` wakeup; otherwise
                // wait for the next checkout to signal low free count.
                let _ = crate::rt::timeout(Duration::from_secs(30), partition.wait_for_growth_signal()).await;
                continue;
            }

            let mut grown = 0;
            while grown < partition.acquire_increment && partition.total() < partition.max {
                match shared.acquire_one(&partition).await {
                    Some(handle) => {
                        partition.record_new_connection();
                        if partition.push_free(handle).is_err() {
                            warn!("partition {} free queue full immediately after growth", partition.index);
                            break;
                        }
                        partition.set_unable_to_grow(false);
                        partition.signal_growth();
                        grown += 1;
                    }
                    None => {
                        partition.set_unable_to_grow(true);
                        break;
                    }
                }
            }
        }
    })
}

/// Per-partition keep-alive and eviction worker (§4.1.2, §4.4). Periodically
/// walks the free queue: handles past `max_connection_age` are retired
/// outright, handles idle past `idle_max_age` are retired down to the
/// partition's minimum, handles due for a liveness check are probed and
/// retired on probe failure, the rest are requeued unchanged.
pub(super) fn spawn_keepalive_worker(
    shared: Arc<PoolShared>,
    partition: Arc<PartitionShared>,
    test_period: Duration,
) -> crate::rt::JoinHandle<()> {
    crate::rt::spawn(async move {
        loop {
            crate::rt::sleep(test_period).await;
            if shared.is_shutting_down() {
                break;
            }

            let sweep_size = partition.free_len();
            for _ in 0..sweep_size {
                let Some(mut handle) = partition.try_checkout() else { break };

                if handle.is_expired(shared.config.max_connection_age) {
                    handle.internal_close().await;
                    partition.record_retirement();
                    partition.signal_growth();
                    continue;
                }

                if shared.config.idle_max_age.is_some_and(|max| handle.idle_for() >= max)
                    && partition.total() > partition.min
                {
                    handle.internal_close().await;
                    partition.record_retirement();
                    partition.signal_growth();
                    continue;
                }

                if handle.since_last_reset() >= test_period {
                    let alive = handle.probe_alive(Duration::from_secs(5)).await;
                    handle.mark_reset();
                    if !alive {
                        handle.mark_possibly_broken();
                        handle.internal_close().await;
                        partition.record_retirement();
                        partition.signal_growth();
                        continue;
                    }
                }

                if partition.push_free(handle).is_err() {
                    warn!("partition {} free queue full during keep-alive sweep", partition.index);
                }
            }
        }
    })
}
