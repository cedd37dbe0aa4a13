//! Checkout/checkin orchestration on top of the timed stack

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tracing::debug;

use crate::config::PoolConfig;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::manager::ConnectionManager;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::proxy::PoolProxy;
use crate::stack::TimedStack;
use crate::wrapper::ConnectionWrapper;

/// Thread-safe connection pool with lazy creation and bounded checkout.
///
/// Connections are created on demand up to the configured size, handed out
/// with exclusive ownership, and recycled when they exceed `max_age`, fail
/// validation, or are explicitly expired. [`Pool::with`] is the primary
/// usage pattern; explicit [`Pool::checkout`]/[`Pool::checkin`] exist for
/// callers that need to hold a connection across a wider scope.
///
/// # Examples
///
/// ```
/// use connpool::{Pool, PoolConfig};
///
/// let pool = Pool::with_connector(PoolConfig::new().with_size(2), || {
///     Ok(String::from("session"))
/// })
/// .unwrap();
///
/// let len = pool.with(|conn| conn.len()).unwrap();
/// assert_eq!(len, 7);
/// ```
pub struct Pool<T> {
    config: PoolConfig,
    manager: Arc<ConnectionManager<T>>,
    available: TimedStack<T>,
    checked_out: DashSet<usize>,
    metrics: MetricsTracker,
}

impl<T> Pool<T> {
    /// Create a pool with no connect function configured yet.
    ///
    /// Checkouts fail with [`PoolError::ConnectNotConfigured`] until
    /// [`Pool::connect_with`] is called.
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let manager = Arc::new(ConnectionManager::new());
        let available = TimedStack::new(Arc::clone(&manager), config.size);
        Ok(Self {
            config,
            manager,
            available,
            checked_out: DashSet::new(),
            metrics: MetricsTracker::new(),
        })
    }

    /// Create a pool with its connect function in one step.
    pub fn with_connector<F>(config: PoolConfig, connect: F) -> PoolResult<Self>
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let pool = Self::new(config)?;
        pool.connect_with(connect);
        Ok(pool)
    }

    /// Create a pool and wrap it in a [`PoolProxy`], exposing it as if it
    /// were a single connection.
    pub fn wrap<F>(config: PoolConfig, connect: F) -> PoolResult<PoolProxy<T>>
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Ok(PoolProxy::new(Arc::new(Self::with_connector(config, connect)?)))
    }

    /// Replace the connect function. Affects only future creations.
    pub fn connect_with<F>(&self, f: F)
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.manager.connect_with(f);
    }

    /// Replace the disconnect function. Affects only future teardowns.
    pub fn disconnect_with<F>(&self, f: F)
    where
        F: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.manager.disconnect_with(f);
    }

    /// Replace the validate function. Affects only future checks.
    pub fn validate_with<F>(&self, f: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.manager.validate_with(f);
    }

    /// Check a connection out with the pool's default timeout.
    pub fn checkout(&self) -> PoolResult<ConnectionWrapper<T>> {
        self.checkout_within(self.config.checkout_timeout)
    }

    /// Check a connection out, waiting up to `timeout`.
    ///
    /// Expired connections encountered along the way are discarded and the
    /// attempt retries against the same deadline; the timer is never
    /// restarted. The ownership record between a successful pop and the
    /// return is a plain in-memory insert with no unwind or suspension
    /// point, so a connection is either fully handed to the caller or not
    /// handed out at all.
    pub fn checkout_within(&self, timeout: Duration) -> PoolResult<ConnectionWrapper<T>> {
        let started = Instant::now();
        let mut retried = false;
        loop {
            if retried && started.elapsed() >= timeout {
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::CheckoutTimeout {
                    requested: timeout,
                    waited: started.elapsed(),
                });
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            let conn = match self.available.pop(remaining) {
                Ok(conn) => conn,
                Err(PoolError::CheckoutTimeout { .. }) => {
                    self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::CheckoutTimeout {
                        requested: timeout,
                        waited: started.elapsed(),
                    });
                }
                Err(err) => return Err(err),
            };
            if self.expired(&conn) {
                debug!(id = conn.id(), "recycling expired connection");
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                self.available.abandon(&conn);
                conn.close()?;
                retried = true;
                continue;
            }
            self.checked_out.insert(conn.id());
            self.metrics.checkouts.fetch_add(1, Ordering::Relaxed);
            return Ok(conn);
        }
    }

    /// Return a checked-out connection to the pool.
    ///
    /// Fails with [`PoolError::UnknownCheckin`] when the wrapper was not
    /// checked out from this pool, leaving the pool untouched. An expired
    /// connection is torn down instead of being returned.
    pub fn checkin(&self, mut conn: ConnectionWrapper<T>) -> PoolResult<()> {
        if self.checked_out.remove(&conn.id()).is_none() {
            return Err(PoolError::UnknownCheckin);
        }
        conn.touch();
        self.metrics.checkins.fetch_add(1, Ordering::Relaxed);
        if self.expired(&conn) {
            debug!(id = conn.id(), "recycling expired connection on checkin");
            self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
            self.available.abandon(&conn);
            return conn.close();
        }
        self.available.push(conn)
    }

    /// Run `body` with a checked-out connection, using the default timeout.
    ///
    /// The connection is checked back in on every exit path, including an
    /// unwinding panic in `body`.
    pub fn with<R, F>(&self, body: F) -> PoolResult<R>
    where
        F: FnOnce(&mut ConnectionWrapper<T>) -> R,
    {
        self.with_within(self.config.checkout_timeout, body)
    }

    /// Run `body` with a checked-out connection, waiting up to `timeout`.
    pub fn with_within<R, F>(&self, timeout: Duration, body: F) -> PoolResult<R>
    where
        F: FnOnce(&mut ConnectionWrapper<T>) -> R,
    {
        let conn = self.checkout_within(timeout)?;
        let mut held = CheckedOut {
            pool: self,
            conn: Some(conn),
        };
        let result = body(held.conn.as_mut().expect("connection already returned"));
        held.finish()?;
        Ok(result)
    }

    /// Shut the pool down.
    ///
    /// Idempotent. Idle connections are torn down immediately; connections
    /// currently checked out stay usable and are torn down one by one as
    /// they come back. All later checkouts fail with
    /// [`PoolError::ShuttingDown`].
    pub fn shutdown(&self) -> PoolResult<()> {
        self.available.shutdown()
    }

    pub fn is_shutdown(&self) -> bool {
        self.available.is_closed()
    }

    /// Configured capacity.
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Idle connections currently in the pool.
    pub fn available_count(&self) -> usize {
        self.available.available_count()
    }

    /// Connections currently checked out.
    pub fn checked_out_count(&self) -> usize {
        self.checked_out.len()
    }

    /// Snapshot of the pool's metrics.
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.snapshot(
            self.manager.created_total(),
            self.manager.closed_total(),
            self.available.available_count(),
            self.checked_out.len(),
            self.config.size,
        )
    }

    fn expired(&self, conn: &ConnectionWrapper<T>) -> bool {
        if conn.is_expired() {
            return true;
        }
        if let Some(max_age) = self.config.max_age {
            if conn.age() > max_age {
                return true;
            }
        }
        !self.manager.validate(conn.raw())
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Run `body` with a checked-out connection on a blocking worker thread.
    ///
    /// Async adapter over [`Pool::with`] for callers inside a tokio
    /// runtime; the checkout itself still blocks, but on a thread where
    /// blocking is allowed. Call as `Arc::clone(&pool).with_async(..)`.
    pub async fn with_async<R, F>(self: Arc<Self>, body: F) -> PoolResult<R>
    where
        F: FnOnce(&mut ConnectionWrapper<T>) -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(move || self.with(body))
            .await
            .map_err(|_| PoolError::Cancelled)?
    }
}

/// Scoped checkout that returns the connection on drop.
///
/// The normal path goes through `finish` so a checkin failure reaches the
/// caller; the drop path covers unwinding out of the body.
struct CheckedOut<'a, T> {
    pool: &'a Pool<T>,
    conn: Option<ConnectionWrapper<T>>,
}

impl<T> CheckedOut<'_, T> {
    fn finish(mut self) -> PoolResult<()> {
        match self.conn.take() {
            Some(conn) => self.pool.checkin(conn),
            None => Ok(()),
        }
    }
}

impl<T> Drop for CheckedOut<'_, T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.pool.checkin(conn);
        }
    }
}
