//! Runtime features.
//!
//! All functions here are always available regardless of whether the `tokio`
//! feature is enabled, but calling one without it will panic.
use std::future::Future;
use std::time::Duration;

macro_rules! rt_tokio {
    {($($t1:tt)*),$($tt:tt)*} => {
        #[cfg(feature = "tokio")]
        { $($tt)* }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = ($($t1)*);
            panic!("runtime disabled")
        }
    };
}

// ===== time =====

pub async fn timeout<F: Future>(duration: Duration, f: F) -> Result<F::Output, TimeoutError> {
    rt_tokio! {
        (duration, f),
        tokio::time::timeout(duration, f).await.map_err(|_| TimeoutError)
    }
}

pub async fn sleep(duration: Duration) {
    rt_tokio! {
        (duration),
        tokio::time::sleep(duration).await
    }
}

#[derive(Debug, thiserror::Error)]
#[error("operation timed out")]
pub struct TimeoutError;

// ===== task =====

pub fn spawn<F>(f: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    rt_tokio! {
        (f),
        JoinHandle::Tokio(tokio::task::spawn(f))
    }
}

#[derive(Debug)]
pub enum JoinHandle<T> {
    #[cfg(feature = "tokio")]
    Tokio(tokio::task::JoinHandle<T>),
    Phantom(std::marker::PhantomData<fn() -> T>),
}

impl<T: Send + 'static> Future for JoinHandle<T> {
    type Output = T;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        match &mut *self {
            #[cfg(feature = "tokio")]
            JoinHandle::Tokio(handle) => {
                std::pin::Pin::new(handle).poll(cx).map(|res| res.expect("spawned task panicked"))
            }
            JoinHandle::Phantom(_) => {
                let _ = cx;
                panic!("runtime disabled")
            }
        }
    }
}

/// Fire a future onto the runtime without keeping its handle around, for
/// best-effort cleanup work (closing an evicted statement, a background
/// retirement) where the caller has nothing meaningful to join on.
pub fn spawn_detached<F>(f: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let _ = spawn(f);
}
