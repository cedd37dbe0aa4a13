//! Bounded, lazily-populated blocking stack of connections

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::errors::{PoolError, PoolResult};
use crate::manager::ConnectionManager;
use crate::wrapper::ConnectionWrapper;

struct StackState<T> {
    /// Idle connections, most recently returned last. Checkouts pop from
    /// the back so hot connections are reused first.
    available: Vec<ConnectionWrapper<T>>,
    /// Live connections instantiated through this stack. Always
    /// `<= capacity`; equals `available.len()` plus connections currently
    /// checked out.
    created: usize,
    closed: bool,
}

/// Capacity-bounded blocking LIFO container with lazy population.
///
/// `pop` is the only operation that blocks, bounded by an explicit timeout.
/// Waiters park in arrival order and are woken first-come-first-served when
/// a connection is returned or a capacity slot frees up. The internal lock
/// is never held across a blocking wait or a user callback.
pub struct TimedStack<T> {
    state: Mutex<StackState<T>>,
    ready: Condvar,
    capacity: usize,
    manager: Arc<ConnectionManager<T>>,
}

impl<T> TimedStack<T> {
    pub fn new(manager: Arc<ConnectionManager<T>>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(StackState {
                available: Vec::with_capacity(capacity),
                created: 0,
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            manager,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idle connections currently in the stack.
    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Live connections created and not yet torn down or abandoned.
    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Take a connection, waiting up to `timeout` for one to appear.
    ///
    /// Returns the most recently pushed idle connection when one exists,
    /// otherwise creates a new one while the stack is under capacity,
    /// otherwise blocks. A zero timeout fails immediately when nothing is
    /// available. Fails with [`PoolError::ShuttingDown`] without waiting
    /// once the stack is closed.
    ///
    /// A timed-out pop leaves the stack exactly as it found it.
    pub fn pop(&self, timeout: Duration) -> PoolResult<ConnectionWrapper<T>> {
        let started = Instant::now();
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }
            if let Some(conn) = state.available.pop() {
                return Ok(conn);
            }
            if state.created < self.capacity {
                // Reserve the slot before connecting so concurrent poppers
                // cannot overshoot capacity, then connect unlocked so a slow
                // connect callback does not stall pushes and other pops.
                state.created += 1;
                drop(state);
                return self.create_reserved();
            }
            let waited = started.elapsed();
            match timeout.checked_sub(waited) {
                Some(remaining) => {
                    // Timeouts and spurious wakeups both fall through to the
                    // re-check at the top of the loop.
                    let _ = self.ready.wait_for(&mut state, remaining);
                }
                None => {
                    return Err(PoolError::CheckoutTimeout {
                        requested: timeout,
                        waited,
                    });
                }
            }
        }
    }

    fn create_reserved(&self) -> PoolResult<ConnectionWrapper<T>> {
        match self.manager.create_wrapped() {
            Ok(conn) => {
                debug!(id = conn.id(), "created pooled connection");
                Ok(conn)
            }
            Err(err) => {
                // Release the reserved slot and let another popper have it.
                let mut state = self.state.lock();
                state.created -= 1;
                drop(state);
                self.ready.notify_one();
                Err(err)
            }
        }
    }

    /// Return a connection and wake one waiter.
    ///
    /// Once the stack is closed the connection was necessarily checked out
    /// before shutdown, so it is torn down here instead of being kept.
    pub fn push(&self, conn: ConnectionWrapper<T>) -> PoolResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            state.created -= 1;
            drop(state);
            debug!(id = conn.id(), "closing connection returned after shutdown");
            return conn.close();
        }
        state.available.push(conn);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Discard a connection from the bookkeeping without returning or
    /// destroying it.
    ///
    /// Frees a capacity slot so a later `pop` may create a replacement;
    /// tearing the abandoned connection down is the caller's business.
    pub fn abandon(&self, conn: &ConnectionWrapper<T>) {
        let mut state = self.state.lock();
        state.created = state.created.saturating_sub(1);
        drop(state);
        debug!(id = conn.id(), "abandoned connection");
        self.ready.notify_one();
    }

    /// Close the stack and tear down every idle connection.
    ///
    /// Idempotent. Blocked pops are woken and fail with
    /// [`PoolError::ShuttingDown`]. Connections checked out at this point
    /// are left untouched; each is torn down when it is pushed back.
    ///
    /// Teardown failures do not stop the remaining teardowns: every idle
    /// connection is attempted, failures are logged, and the first one is
    /// reported once the sweep finishes.
    pub fn shutdown(&self) -> PoolResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let idle = std::mem::take(&mut state.available);
        state.created -= idle.len();
        drop(state);
        self.ready.notify_all();

        let mut first_failure = None;
        for conn in idle {
            let id = conn.id();
            if let Err(err) = conn.close() {
                warn!(id, error = %err, "failed to close idle connection during shutdown");
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_manager() -> (Arc<ConnectionManager<usize>>, Arc<AtomicUsize>) {
        let manager = Arc::new(ConnectionManager::new());
        let sequence = Arc::new(AtomicUsize::new(0));
        let seq = Arc::clone(&sequence);
        manager.connect_with(move || Ok(seq.fetch_add(1, Ordering::SeqCst)));
        (manager, sequence)
    }

    #[test]
    fn pop_creates_lazily_up_to_capacity() {
        let (manager, created) = counting_manager();
        let stack = TimedStack::new(manager, 2);

        let first = stack.pop(Duration::ZERO).unwrap();
        let second = stack.pop(Duration::ZERO).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(stack.created_count(), 2);

        assert!(matches!(
            stack.pop(Duration::ZERO),
            Err(PoolError::CheckoutTimeout { .. })
        ));
        assert_eq!(created.load(Ordering::SeqCst), 2);

        stack.push(first).unwrap();
        stack.push(second).unwrap();
    }

    #[test]
    fn pop_prefers_most_recently_pushed() {
        let (manager, _) = counting_manager();
        let stack = TimedStack::new(manager, 2);

        let first = stack.pop(Duration::ZERO).unwrap();
        let second = stack.pop(Duration::ZERO).unwrap();
        let (first_id, second_id) = (first.id(), second.id());

        stack.push(first).unwrap();
        stack.push(second).unwrap();

        assert_eq!(stack.pop(Duration::ZERO).unwrap().id(), second_id);
        assert_eq!(stack.pop(Duration::ZERO).unwrap().id(), first_id);
    }

    #[test]
    fn zero_timeout_fails_immediately_when_exhausted() {
        let (manager, _) = counting_manager();
        let stack = TimedStack::new(manager, 0);

        let started = Instant::now();
        let result = stack.pop(Duration::ZERO);
        assert!(matches!(result, Err(PoolError::CheckoutTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn timeout_error_reports_requested_duration() {
        let (manager, _) = counting_manager();
        let stack = TimedStack::new(manager, 0);

        match stack.pop(Duration::from_millis(30)) {
            Err(PoolError::CheckoutTimeout { requested, waited }) => {
                assert_eq!(requested, Duration::from_millis(30));
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn blocked_pop_receives_pushed_connection() {
        let (manager, _) = counting_manager();
        let stack = TimedStack::new(manager, 1);
        let held = stack.pop(Duration::ZERO).unwrap();
        let held_id = held.id();

        crossbeam::thread::scope(|s| {
            let waiter = s.spawn(|_| stack.pop(Duration::from_secs(5)));
            thread::sleep(Duration::from_millis(50));
            stack.push(held).unwrap();

            let conn = waiter.join().unwrap().unwrap();
            assert_eq!(conn.id(), held_id);
            stack.push(conn).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn concurrent_pops_never_overshoot_capacity() {
        let (manager, created) = counting_manager();
        let stack = TimedStack::new(manager, 3);

        crossbeam::thread::scope(|s| {
            for _ in 0..10 {
                s.spawn(|_| {
                    if let Ok(conn) = stack.pop(Duration::from_millis(200)) {
                        thread::sleep(Duration::from_millis(10));
                        stack.push(conn).unwrap();
                    }
                });
            }
        })
        .unwrap();

        assert!(created.load(Ordering::SeqCst) <= 3);
        assert_eq!(stack.created_count(), created.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_creation_releases_the_reserved_slot() {
        let manager: Arc<ConnectionManager<usize>> = Arc::new(ConnectionManager::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let tries = Arc::clone(&attempts);
        manager.connect_with(move || {
            if tries.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("connect refused".into())
            } else {
                Ok(9)
            }
        });
        let stack = TimedStack::new(manager, 1);

        assert!(matches!(
            stack.pop(Duration::ZERO),
            Err(PoolError::Callback(_))
        ));
        assert_eq!(stack.created_count(), 0);

        let conn = stack.pop(Duration::ZERO).unwrap();
        assert_eq!(*conn.raw(), 9);
        stack.push(conn).unwrap();
    }

    #[test]
    fn abandon_frees_a_slot_for_a_replacement() {
        let (manager, created) = counting_manager();
        let stack = TimedStack::new(manager, 1);

        let conn = stack.pop(Duration::ZERO).unwrap();
        stack.abandon(&conn);
        conn.close().unwrap();
        assert_eq!(stack.created_count(), 0);

        let replacement = stack.pop(Duration::ZERO).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        stack.push(replacement).unwrap();
    }

    #[test]
    fn pop_after_shutdown_fails_without_waiting() {
        let (manager, _) = counting_manager();
        let stack = TimedStack::new(manager, 1);
        stack.shutdown().unwrap();

        let started = Instant::now();
        assert!(matches!(
            stack.pop(Duration::from_secs(5)),
            Err(PoolError::ShuttingDown)
        ));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn shutdown_wakes_blocked_pops() {
        let (manager, _) = counting_manager();
        let stack = TimedStack::new(manager, 0);

        crossbeam::thread::scope(|s| {
            let waiter = s.spawn(|_| stack.pop(Duration::from_secs(5)));
            thread::sleep(Duration::from_millis(50));
            stack.shutdown().unwrap();

            assert!(matches!(
                waiter.join().unwrap(),
                Err(PoolError::ShuttingDown)
            ));
        })
        .unwrap();
    }

    #[test]
    fn shutdown_tears_down_idle_connections_once() {
        let manager: Arc<ConnectionManager<usize>> = Arc::new(ConnectionManager::new());
        manager.connect_with(|| Ok(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&closed);
        manager.disconnect_with(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let stack = TimedStack::new(manager, 2);

        let a = stack.pop(Duration::ZERO).unwrap();
        let b = stack.pop(Duration::ZERO).unwrap();
        stack.push(a).unwrap();
        stack.push(b).unwrap();

        stack.shutdown().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert_eq!(stack.available_count(), 0);

        // Second shutdown is a no-op.
        stack.shutdown().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn push_after_shutdown_tears_the_connection_down() {
        let manager: Arc<ConnectionManager<usize>> = Arc::new(ConnectionManager::new());
        manager.connect_with(|| Ok(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&closed);
        manager.disconnect_with(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let stack = TimedStack::new(manager, 1);

        let held = stack.pop(Duration::ZERO).unwrap();
        stack.shutdown().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        stack.push(held).unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(stack.available_count(), 0);
    }

    #[test]
    fn one_failing_teardown_does_not_stop_the_rest() {
        let manager: Arc<ConnectionManager<usize>> = Arc::new(ConnectionManager::new());
        manager.connect_with(|| Ok(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&closed);
        manager.disconnect_with(move |_| {
            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("broken socket".into())
            } else {
                Ok(())
            }
        });
        let stack = TimedStack::new(manager, 3);

        let conns: Vec<_> = (0..3).map(|_| stack.pop(Duration::ZERO).unwrap()).collect();
        for conn in conns {
            stack.push(conn).unwrap();
        }

        assert!(matches!(stack.shutdown(), Err(PoolError::Callback(_))));
        assert_eq!(closed.load(Ordering::SeqCst), 3);
        assert_eq!(stack.available_count(), 0);
    }
}
