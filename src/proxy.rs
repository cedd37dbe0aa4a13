//! Pass-through facade exposing a pool as a single connection

use std::sync::Arc;

use crate::errors::PoolResult;
use crate::pool::Pool;
use crate::wrapper::ConnectionWrapper;

/// Uses the pool as if it were the raw connection.
///
/// Every forwarded operation performs one checkout/checkin cycle, so
/// consecutive calls may land on different underlying connections; callers
/// that need connection affinity (sessions, transactions) should use
/// [`Pool::with`] and do their work inside one scope. The proxy adds no
/// invariants of its own.
///
/// # Examples
///
/// ```
/// use connpool::{Pool, PoolConfig};
///
/// let proxy = Pool::wrap(PoolConfig::new().with_size(1), || {
///     Ok(Vec::<u8>::new())
/// })
/// .unwrap();
///
/// proxy.invoke(|buf| buf.push(1)).unwrap();
/// let len = proxy.invoke(|buf| buf.len()).unwrap();
/// assert_eq!(len, 1);
/// ```
pub struct PoolProxy<T> {
    pool: Arc<Pool<T>>,
}

impl<T> PoolProxy<T> {
    pub fn new(pool: Arc<Pool<T>>) -> Self {
        Self { pool }
    }

    /// The wrapped pool.
    pub fn pool(&self) -> &Arc<Pool<T>> {
        &self.pool
    }

    /// Forward one operation to a pooled connection.
    pub fn invoke<R, F>(&self, op: F) -> PoolResult<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.pool.with(|conn| op(conn.raw_mut()))
    }

    /// Ask a momentarily checked-out connection whether it supports an
    /// operation.
    pub fn probe<F>(&self, probe: F) -> PoolResult<bool>
    where
        F: FnOnce(&T) -> bool,
    {
        self.pool.with(|conn| probe(conn.raw()))
    }

    /// Run `body` with a checked-out connection, as [`Pool::with`].
    pub fn with<R, F>(&self, body: F) -> PoolResult<R>
    where
        F: FnOnce(&mut ConnectionWrapper<T>) -> R,
    {
        self.pool.with(body)
    }

    /// Shut the underlying pool down.
    pub fn shutdown(&self) -> PoolResult<()> {
        self.pool.shutdown()
    }
}

impl<T> Clone for PoolProxy<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::errors::PoolError;
    use std::time::Duration;

    struct NetConn {
        hits: usize,
    }

    fn proxy_of_one() -> PoolProxy<NetConn> {
        Pool::wrap(
            PoolConfig::new()
                .with_size(1)
                .with_checkout_timeout(Duration::from_millis(200)),
            || Ok(NetConn { hits: 0 }),
        )
        .unwrap()
    }

    #[test]
    fn invoke_forwards_one_call_per_cycle() {
        let proxy = proxy_of_one();

        let hits = proxy
            .invoke(|conn| {
                conn.hits += 1;
                conn.hits
            })
            .unwrap();
        assert_eq!(hits, 1);

        let hits = proxy
            .invoke(|conn| {
                conn.hits += 1;
                conn.hits
            })
            .unwrap();
        assert_eq!(hits, 2);

        // Nothing stays checked out between calls.
        assert_eq!(proxy.pool().checked_out_count(), 0);
        assert_eq!(proxy.pool().available_count(), 1);
    }

    #[test]
    fn probe_checks_a_connection_out_momentarily() {
        let proxy = proxy_of_one();

        assert!(proxy.probe(|conn| conn.hits == 0).unwrap());
        assert!(!proxy.probe(|conn| conn.hits > 0).unwrap());
        assert_eq!(proxy.pool().checked_out_count(), 0);
    }

    #[test]
    fn with_is_forwarded_to_the_pool() {
        let proxy = proxy_of_one();

        let hits = proxy
            .with(|conn| {
                conn.hits += 1;
                conn.hits
            })
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn clones_share_the_underlying_pool() {
        let proxy = proxy_of_one();
        let other = proxy.clone();

        proxy.invoke(|conn| conn.hits += 1).unwrap();
        let hits = other.invoke(|conn| conn.hits).unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn shutdown_passes_through() {
        let proxy = proxy_of_one();
        proxy.invoke(|conn| conn.hits += 1).unwrap();

        proxy.shutdown().unwrap();
        assert!(matches!(
            proxy.invoke(|conn| conn.hits),
            Err(PoolError::ShuttingDown)
        ));
    }
}
