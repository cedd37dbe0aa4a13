//! Connection lifecycle callbacks

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::errors::{BoxError, PoolError, PoolResult};
use crate::wrapper::ConnectionWrapper;

/// Application-supplied connection factory.
pub type ConnectFn<T> = dyn Fn() -> Result<T, BoxError> + Send + Sync;
/// Application-supplied connection teardown.
pub type DisconnectFn<T> = dyn Fn(T) -> Result<(), BoxError> + Send + Sync;
/// Application-supplied connection health check.
pub type ValidateFn<T> = dyn Fn(&T) -> bool + Send + Sync;

/// Knows how to create, validate and tear down a raw connection.
///
/// All three callables may be replaced at any time; a replacement affects
/// only future creations, destructions and validations, never connections
/// already issued.
pub struct ConnectionManager<T> {
    connect: RwLock<Option<Arc<ConnectFn<T>>>>,
    disconnect: RwLock<Option<Arc<DisconnectFn<T>>>>,
    validate: RwLock<Option<Arc<ValidateFn<T>>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl<T> ConnectionManager<T> {
    pub fn new() -> Self {
        Self {
            connect: RwLock::new(None),
            disconnect: RwLock::new(None),
            validate: RwLock::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Replace the connect callable
    pub fn connect_with<F>(&self, f: F)
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        *self.connect.write() = Some(Arc::new(f));
    }

    /// Replace the disconnect callable
    pub fn disconnect_with<F>(&self, f: F)
    where
        F: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        *self.disconnect.write() = Some(Arc::new(f));
    }

    /// Replace the validate callable
    pub fn validate_with<F>(&self, f: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        *self.validate.write() = Some(Arc::new(f));
    }

    /// Create a raw connection via the configured callable.
    ///
    /// Fails with [`PoolError::ConnectNotConfigured`] when no callable has
    /// been set; failures from the callable itself propagate unchanged.
    pub fn connect(&self) -> PoolResult<T> {
        let connect = self
            .connect
            .read()
            .clone()
            .ok_or(PoolError::ConnectNotConfigured)?;
        let conn = connect().map_err(PoolError::Callback)?;
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Tear down a raw connection. A no-op when no callable is configured.
    pub fn disconnect(&self, conn: T) -> PoolResult<()> {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        match self.disconnect.read().clone() {
            Some(disconnect) => disconnect(conn).map_err(PoolError::Callback),
            None => Ok(()),
        }
    }

    /// Check a raw connection. Connections are valid by default.
    pub fn validate(&self, conn: &T) -> bool {
        match self.validate.read().clone() {
            Some(validate) => validate(conn),
            None => true,
        }
    }

    /// Create a new wrapped connection. This is the sole creation path
    /// used by the stack.
    pub fn create_wrapped(self: &Arc<Self>) -> PoolResult<ConnectionWrapper<T>> {
        let raw = self.connect()?;
        Ok(ConnectionWrapper::new(raw, Arc::clone(self)))
    }

    /// Total connections ever created through this manager.
    pub fn created_total(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Total connections ever torn down through this manager.
    pub fn closed_total(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }
}

impl<T> Default for ConnectionManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_fails_until_configured() {
        let manager = ConnectionManager::<u32>::new();
        assert!(matches!(
            manager.connect(),
            Err(PoolError::ConnectNotConfigured)
        ));

        manager.connect_with(|| Ok(7));
        assert_eq!(manager.connect().unwrap(), 7);
        assert_eq!(manager.created_total(), 1);
    }

    #[test]
    fn connect_failure_propagates_unwrapped() {
        let manager = ConnectionManager::<u32>::new();
        manager.connect_with(|| Err("refused".into()));

        match manager.connect() {
            Err(PoolError::Callback(err)) => assert_eq!(err.to_string(), "refused"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(manager.created_total(), 0);
    }

    #[test]
    fn disconnect_is_noop_when_unconfigured() {
        let manager = ConnectionManager::<u32>::new();
        assert!(manager.disconnect(3).is_ok());
        assert_eq!(manager.closed_total(), 1);
    }

    #[test]
    fn validate_defaults_to_true() {
        let manager = ConnectionManager::<u32>::new();
        assert!(manager.validate(&0));

        manager.validate_with(|n| *n > 10);
        assert!(!manager.validate(&0));
        assert!(manager.validate(&11));
    }

    #[test]
    fn replacing_connect_affects_future_creations() {
        let manager = Arc::new(ConnectionManager::new());
        manager.connect_with(|| Ok("old"));
        let first = manager.create_wrapped().unwrap();

        manager.connect_with(|| Ok("new"));
        let second = manager.create_wrapped().unwrap();

        assert_eq!(*first.raw(), "old");
        assert_eq!(*second.raw(), "new");
        assert_ne!(first.id(), second.id());
    }
}
