//! Connection Pool (spec §4.2, component C2).
//!
//! Hands out reusable or exclusive broker connections keyed by URL,
//! threaded through cancellation. The actual wire-level dial is out of
//! scope (spec.md §1); callers supply a [`BrokerDialer`].
//!
//! The single-flight `reuse=true` path grounds on the teacher's
//! `LazyProvider<T>` (`allframe-core/src/di/lazy.rs`, `tokio::sync::OnceCell`
//! backed), generalized from one lazily-initialized value to a map of them
//! keyed by URL. The broker dial is wrapped in [`crate::resilience::retry`]
//! and raced against the caller's [`BusCancellation`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use url::Url;

use crate::cancellation::BusCancellation;
use crate::error::BusError;
use crate::resilience::{RetryConfig, RetryExecutor};

/// Abstracts the actual broker dial. The wire-level AMQP implementation is
/// out of scope for this crate (spec.md §1); this is the seam a concrete
/// transport plugs into.
#[async_trait]
pub trait BrokerDialer: Send + Sync {
    /// Attempt to open a connection to `url`. Transient failures should be
    /// returned as `Err` so the pool's retry policy can retry them.
    async fn dial(&self, url: &Url) -> Result<(), BusError>;
}

/// A handle to an open broker connection.
///
/// Invariant I4/I5 (spec §3): a `reuse=true` connection is shared among all
/// callers requesting the same URL with that policy; `reuse=false` always
/// yields a fresh one.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    url: Url,
}

impl Connection {
    /// The connection's pool-assigned identity. Two `Connection`s with the
    /// same `id` are the same underlying broker session (used by tests to
    /// assert reuse).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The broker URL this connection is open against.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build a `Connection` directly, bypassing the pool. Used by tests in
    /// [`crate::listener`] and [`crate::receiver`] that need a connection
    /// handle without dialing one.
    #[cfg(test)]
    pub(crate) fn for_test(id: u64, url: Url) -> Self {
        Self { id, url }
    }
}

/// Hands out [`Connection`]s per (URL, reuse-policy), cancellable.
pub struct ConnectionPool {
    dialer: Arc<dyn BrokerDialer>,
    retry: RetryConfig,
    next_id: AtomicU64,
    shared: DashMap<Url, Arc<OnceCell<Connection>>>,
}

impl ConnectionPool {
    /// Create a pool backed by `dialer`, retrying a failed dial per `retry`.
    pub fn new(dialer: Arc<dyn BrokerDialer>, retry: RetryConfig) -> Self {
        Self {
            dialer,
            retry,
            next_id: AtomicU64::new(1),
            shared: DashMap::new(),
        }
    }

    /// Get a connection for `url`.
    ///
    /// If `reuse` is true, the existing shared connection for `url` is
    /// returned, opening one if none exists yet; concurrent callers await
    /// the single in-flight open. If `reuse` is false, a fresh connection
    /// is opened and owned exclusively by the caller.
    pub async fn get(
        &self,
        url: &Url,
        reuse: bool,
        cancel: &BusCancellation,
    ) -> Result<Connection, BusError> {
        if reuse {
            let cell = self
                .shared
                .entry(url.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let result = cancel
                .run_until_cancelled(cell.get_or_try_init(|| self.open(url)))
                .await;

            match result {
                Some(Ok(conn)) => Ok(conn.clone()),
                Some(Err(err)) => Err(err),
                None => Err(BusError::Canceled),
            }
        } else {
            match cancel.run_until_cancelled(self.open(url)).await {
                Some(Ok(conn)) => Ok(conn),
                Some(Err(err)) => Err(err),
                None => Err(BusError::Canceled),
            }
        }
    }

    async fn open(&self, url: &Url) -> Result<Connection, BusError> {
        let executor = RetryExecutor::new(self.retry.clone());
        let url_for_dial = url.clone();
        executor
            .execute("dial_broker", || {
                let url = url_for_dial.clone();
                async move { self.dialer.dial(&url).await.map_err(RetryDialError) }
            })
            .await
            .map_err(|retry_err| retry_err.last_error.0)?;

        Ok(Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            url: url.clone(),
        })
    }
}

/// Wraps `BusError` so it implements `std::error::Error`, a requirement of
/// [`RetryExecutor::execute`].
#[derive(Debug)]
struct RetryDialError(BusError);

impl std::fmt::Display for RetryDialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryDialError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct AlwaysSucceeds;

    #[async_trait]
    impl BrokerDialer for AlwaysSucceeds {
        async fn dial(&self, _url: &Url) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn pool() -> ConnectionPool {
        ConnectionPool::new(Arc::new(AlwaysSucceeds), RetryConfig::new(0))
    }

    #[tokio::test]
    async fn reuse_true_returns_same_connection_id_for_same_url() {
        let pool = pool();
        let cancel = BusCancellation::new();
        let url: Url = "amqp://h1".parse().unwrap();

        let a = pool.get(&url, true, &cancel).await.unwrap();
        let b = pool.get(&url, true, &cancel).await.unwrap();

        assert_eq!(a.id(), b.id());
    }

    #[tokio::test]
    async fn reuse_false_returns_distinct_connection_ids() {
        let pool = pool();
        let cancel = BusCancellation::new();
        let url: Url = "amqp://h1".parse().unwrap();

        let a = pool.get(&url, false, &cancel).await.unwrap();
        let b = pool.get(&url, false, &cancel).await.unwrap();

        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn concurrent_reuse_true_callers_share_one_open() {
        struct CountingDialer(AtomicU32);

        #[async_trait]
        impl BrokerDialer for CountingDialer {
            async fn dial(&self, _url: &Url) -> Result<(), BusError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(())
            }
        }

        let pool = Arc::new(ConnectionPool::new(
            Arc::new(CountingDialer(AtomicU32::new(0))),
            RetryConfig::new(0),
        ));
        let cancel = BusCancellation::new();
        let url: Url = "amqp://h1".parse().unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            let url = url.clone();
            handles.push(tokio::spawn(
                async move { pool.get(&url, true, &cancel).await.unwrap() },
            ));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn already_canceled_token_yields_canceled_error() {
        let pool = pool();
        let cancel = BusCancellation::new();
        cancel.cancel();
        let url: Url = "amqp://h1".parse().unwrap();

        let err = pool.get(&url, false, &cancel).await.unwrap_err();
        assert!(matches!(err, BusError::Canceled));
    }

    #[tokio::test]
    async fn retries_transient_failures_before_succeeding() {
        struct FlakyDialer(AtomicU32);

        #[async_trait]
        impl BrokerDialer for FlakyDialer {
            async fn dial(&self, _url: &Url) -> Result<(), BusError> {
                if self.0.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BusError::Transport("broker unreachable".into()))
                } else {
                    Ok(())
                }
            }
        }

        let pool = ConnectionPool::new(
            Arc::new(FlakyDialer(AtomicU32::new(0))),
            RetryConfig::new(3).with_initial_interval(std::time::Duration::from_millis(1)),
        );
        let cancel = BusCancellation::new();
        let url: Url = "amqp://h1".parse().unwrap();

        let conn = pool.get(&url, false, &cancel).await.unwrap();
        assert_eq!(conn.url().as_str(), "amqp://h1");
    }
}
