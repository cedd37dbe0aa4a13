//! Metadata envelope around a pooled connection

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::errors::PoolResult;
use crate::manager::ConnectionManager;

// Process-wide, so a wrapper id never collides across pools and a foreign
// checkin is always detected.
static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// One raw connection plus the bookkeeping the pool needs to recycle it.
///
/// The wrapper derefs to the raw connection, so pooled connections are used
/// the same way bare ones are. Whoever holds the wrapper owns the connection
/// exclusively until it is checked back in.
pub struct ConnectionWrapper<T> {
    raw: T,
    id: usize,
    manager: Arc<ConnectionManager<T>>,
    created_at: Instant,
    last_used_at: Instant,
    expired: bool,
}

impl<T> ConnectionWrapper<T> {
    pub(crate) fn new(raw: T, manager: Arc<ConnectionManager<T>>) -> Self {
        let now = Instant::now();
        Self {
            raw,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            manager,
            created_at: now,
            last_used_at: now,
            expired: false,
        }
    }

    /// Identity of this wrapper, unique within the process.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Borrow the raw connection.
    pub fn raw(&self) -> &T {
        &self.raw
    }

    /// Mutably borrow the raw connection.
    pub fn raw_mut(&mut self) -> &mut T {
        &mut self.raw
    }

    /// Time since this connection was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since this connection was last returned to the pool.
    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the connection so the pool discards it instead of reusing it at
    /// the next checkin or checkout. Advisory only; the wrapper itself never
    /// acts on the flag.
    pub fn expire(&mut self) {
        self.expired = true;
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    // Timestamps update on checkin, so idle_time reads as "time since last
    // returned to the pool".
    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    /// Tear down the underlying connection via the manager.
    ///
    /// Consumes the wrapper, so a closed connection can never be returned to
    /// the pool or used again.
    pub fn close(self) -> PoolResult<()> {
        let Self { raw, manager, .. } = self;
        manager.disconnect(raw)
    }
}

impl<T> Deref for ConnectionWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl<T> DerefMut for ConnectionWrapper<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.raw
    }
}

impl<T> fmt::Debug for ConnectionWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("id", &self.id)
            .field("age", &self.age())
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn wrapper(raw: u32) -> ConnectionWrapper<u32> {
        let manager = Arc::new(ConnectionManager::new());
        manager.connect_with(move || Ok(raw));
        manager.create_wrapped().unwrap()
    }

    #[test]
    fn derefs_to_raw_connection() {
        let mut conn = wrapper(41);
        *conn += 1;
        assert_eq!(*conn.raw(), 42);
    }

    #[test]
    fn expire_sets_the_flag() {
        let mut conn = wrapper(0);
        assert!(!conn.is_expired());
        conn.expire();
        assert!(conn.is_expired());
    }

    #[test]
    fn age_grows_and_touch_resets_idle_time() {
        let mut conn = wrapper(0);
        thread::sleep(Duration::from_millis(20));
        assert!(conn.age() >= Duration::from_millis(20));
        assert!(conn.idle_time() >= Duration::from_millis(20));

        conn.touch();
        assert!(conn.idle_time() < Duration::from_millis(20));
        assert!(conn.age() >= Duration::from_millis(20));
    }

    #[test]
    fn close_runs_the_disconnect_callback() {
        let manager = Arc::new(ConnectionManager::new());
        manager.connect_with(|| Ok(0u32));
        let conn = manager.create_wrapped().unwrap();

        conn.close().unwrap();
        assert_eq!(manager.closed_total(), 1);
    }
}
